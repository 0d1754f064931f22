//! Pack file encoder: writes the `PACK` header, per-object varint headers,
//! zlib-compressed bodies with optional OFS-delta encoding against earlier
//! entries, and the SHA-1 trailer, computed incrementally while writing.

use std::io::Write;

use flate2::{Compression, write::ZlibEncoder};

use crate::{
    delta::encode::DeltaScript,
    errors::GitError,
    hash::ObjectHash,
    internal::{
        object::types::ObjectType,
        pack::{entry::Entry, pack_index::IdxEntry},
    },
    utils::ObjectHasher,
};

/// Minimum similarity rate for a candidate base to be worth a delta.
const DELTA_SIMILARITY_THRESHOLD: f64 = 0.5;

/// Writer shim that feeds every byte to the trailer digest and the
/// per-entry CRC while counting offsets.
struct PackWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: ObjectHasher,
    crc: Option<crc32fast::Hasher>,
    offset: u64,
}

impl<'a, W: Write> PackWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            hasher: ObjectHasher::new(),
            crc: None,
            offset: 0,
        }
    }

    fn begin_entry(&mut self) {
        self.crc = Some(crc32fast::Hasher::new());
    }

    fn end_entry(&mut self) -> u32 {
        self.crc.take().expect("begin_entry called first").finalize()
    }
}

impl<W: Write> Write for PackWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write_all(buf)?;
        self.hasher.update(buf);
        if let Some(crc) = &mut self.crc {
            crc.update(buf);
        }
        self.offset += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Encoder for a set of objects into one pack stream.
pub struct PackEncoder {
    /// How many previous same-type entries to consider as delta bases.
    /// Zero disables deltafication entirely.
    window: usize,
}

impl PackEncoder {
    pub fn new(window: usize) -> Self {
        PackEncoder { window }
    }

    /// Encode `entries` into `out`. Returns the pack trailer hash and the
    /// idx entries (hash, crc32, offset) for building the companion index.
    pub fn encode(
        &self,
        entries: Vec<Entry>,
        out: &mut impl Write,
    ) -> Result<(ObjectHash, Vec<IdxEntry>), GitError> {
        let mut writer = PackWriter::new(out);

        // Header: magic, version 2, object count.
        writer.write_all(b"PACK")?;
        writer.write_all(&2u32.to_be_bytes())?;
        writer.write_all(&(entries.len() as u32).to_be_bytes())?;

        // Window of recently written entries usable as OFS-delta bases.
        let mut recent: Vec<(ObjectType, u64, Vec<u8>)> = Vec::new();
        let mut idx_entries = Vec::with_capacity(entries.len());

        for entry in &entries {
            let offset = writer.offset;
            writer.begin_entry();

            let delta = self.pick_delta(entry, &recent, offset);
            match delta {
                Some((base_offset, delta_data)) => {
                    Self::write_entry_header(
                        &mut writer,
                        ObjectType::OffsetDelta,
                        delta_data.len(),
                    )?;
                    Self::write_negative_offset(&mut writer, offset - base_offset)?;
                    Self::write_compressed(&mut writer, &delta_data)?;
                }
                None => {
                    Self::write_entry_header(&mut writer, entry.obj_type, entry.data.len())?;
                    Self::write_compressed(&mut writer, &entry.data)?;
                }
            }

            idx_entries.push(IdxEntry {
                hash: entry.hash,
                crc32: writer.end_entry(),
                offset,
            });

            if self.window > 0 {
                recent.push((entry.obj_type, offset, entry.data.clone()));
                if recent.len() > self.window {
                    recent.remove(0);
                }
            }
        }

        let signature = writer.hasher.snapshot();
        writer.write_all(signature.as_ref())?;
        writer.flush()?;
        tracing::debug!(objects = entries.len(), pack = %signature, "encoded pack");
        Ok((signature, idx_entries))
    }

    /// Choose the best recent base for deltafication, if any clears the
    /// similarity threshold and actually shrinks the entry.
    fn pick_delta(
        &self,
        entry: &Entry,
        recent: &[(ObjectType, u64, Vec<u8>)],
        _offset: u64,
    ) -> Option<(u64, Vec<u8>)> {
        if self.window == 0 || entry.data.is_empty() {
            return None;
        }
        let mut best: Option<(u64, Vec<u8>)> = None;
        for (base_type, base_offset, base_data) in recent.iter().rev() {
            if *base_type != entry.obj_type || base_data.is_empty() {
                continue;
            }
            let script = DeltaScript::between(base_data, &entry.data);
            if script.similarity() < DELTA_SIMILARITY_THRESHOLD {
                continue;
            }
            let encoded = script.encode();
            if encoded.len() >= entry.data.len() {
                continue;
            }
            match &best {
                Some((_, b)) if b.len() <= encoded.len() => {}
                _ => best = Some((*base_offset, encoded)),
            }
        }
        best
    }

    /// Object header: 3-bit type and varint size (low 4 bits in the first
    /// byte, 7 bits per continuation byte).
    fn write_entry_header(
        writer: &mut impl Write,
        obj_type: ObjectType,
        size: usize,
    ) -> Result<(), GitError> {
        let mut size = size;
        let mut byte = (obj_type.to_pack_type_u8() << 4) | (size & 0x0F) as u8;
        size >>= 4;
        while size > 0 {
            writer.write_all(&[byte | 0x80])?;
            byte = (size & 0x7F) as u8;
            size >>= 7;
        }
        writer.write_all(&[byte])?;
        Ok(())
    }

    /// The OFS-delta base distance: big-endian 7-bit groups where each
    /// continuation adds `(1 << 7)` to the accumulator.
    fn write_negative_offset(writer: &mut impl Write, distance: u64) -> Result<(), GitError> {
        let mut value = distance;
        let mut bytes = vec![(value & 0x7F) as u8];
        value >>= 7;
        while value > 0 {
            value -= 1;
            bytes.insert(0, 0x80 | (value & 0x7F) as u8);
            value >>= 7;
        }
        writer.write_all(&bytes)?;
        Ok(())
    }

    fn write_compressed(writer: &mut impl Write, data: &[u8]) -> Result<(), GitError> {
        let mut encoder = ZlibEncoder::new(writer, Compression::default());
        encoder.write_all(data)?;
        encoder.finish()?;
        Ok(())
    }
}
