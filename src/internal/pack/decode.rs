//! Pack file decoder: parses the `PACK` header, walks the per-object
//! varint headers and zlib regions, resolves OFS/REF delta chains to base
//! objects, and verifies the SHA-1 trailer. Follows the
//! [pack-format spec](https://git-scm.com/docs/pack-format).

use std::collections::HashMap;
use std::io::{BufRead, Read};

use byteorder::{BigEndian, ByteOrder};

use crate::{
    delta::decode::delta_decode,
    errors::GitError,
    hash::ObjectHash,
    internal::{
        object::types::ObjectType,
        pack::{entry::Entry, wrapper::Wrapper},
        zlib::stream::inflate::ReadBoxed,
    },
    utils::{CountingReader, read_bytes, read_sha},
};

/// One entry as it sits in the pack: resolved object plus its byte offset
/// and the CRC-32 of its raw (compressed) pack region, both needed to build
/// the companion `.idx`.
#[derive(Debug, Clone)]
pub struct PackedEntry {
    pub entry: Entry,
    pub offset: u64,
    pub crc32: u32,
}

/// A fully decoded pack.
#[derive(Debug)]
pub struct DecodedPack {
    /// Object count from the header.
    pub number: usize,
    /// The trailer digest (also the pack's identity for file naming).
    pub signature: ObjectHash,
    /// Entries in pack order, deltas already resolved.
    pub entries: Vec<PackedEntry>,
}

/// Raw per-object record from the first pass, before delta resolution.
struct RawRecord {
    obj_type: ObjectType,
    data: Vec<u8>,
    offset: u64,
    crc32: u32,
    /// For OFS deltas: absolute offset of the base entry.
    base_offset: Option<u64>,
    /// For REF deltas: id of the base object.
    base_hash: Option<ObjectHash>,
}

/// Decoder over an in-memory pack buffer (the smart HTTP client delivers
/// packs in one shot; on-disk packs are small enough to slurp).
pub struct Pack;

impl Pack {
    /// Decode a complete pack. `base_resolver` supplies bases that live
    /// outside the pack (thin packs reference objects the receiver already
    /// has); pass a resolver backed by the object store, or one returning
    /// `None` to reject thin packs.
    pub fn decode(
        data: &[u8],
        base_resolver: impl Fn(&ObjectHash) -> Option<(ObjectType, Vec<u8>)>,
    ) -> Result<DecodedPack, GitError> {
        if data.len() < 32 {
            return Err(GitError::MalformedPack("pack too short".to_string()));
        }

        let mut reader = Wrapper::new(std::io::BufReader::new(std::io::Cursor::new(data)));
        let number = Self::check_header(&mut reader)?;
        tracing::debug!(objects = number, "decoding pack");

        let mut records: Vec<RawRecord> = Vec::with_capacity(number);
        for _ in 0..number {
            records.push(Self::read_record(&mut reader, data)?);
        }

        // Trailer: SHA-1 of everything preceding it.
        let computed = reader.current_hash();
        let signature = read_sha(&mut reader)?;
        if computed != signature {
            return Err(GitError::BadChecksum {
                expected: signature.to_string(),
                actual: computed.to_string(),
            });
        }

        Self::resolve_deltas(records, signature, base_resolver)
    }

    /// Check the pack header: `PACK`, version 2, object count.
    fn check_header<R: BufRead>(reader: &mut Wrapper<R>) -> Result<usize, GitError> {
        let magic = read_bytes(reader, 4)?;
        if magic != b"PACK" {
            return Err(GitError::MalformedPack(format!(
                "bad magic: {:?}",
                String::from_utf8_lossy(&magic)
            )));
        }
        let version = BigEndian::read_u32(&read_bytes(reader, 4)?);
        if version != 2 {
            return Err(GitError::MalformedPack(format!(
                "unsupported pack version {version}"
            )));
        }
        let number = BigEndian::read_u32(&read_bytes(reader, 4)?) as usize;
        Ok(number)
    }

    /// Read one object record: varint type+size header, optional delta base
    /// reference, then the zlib region.
    fn read_record<R: BufRead>(
        reader: &mut Wrapper<R>,
        data: &[u8],
    ) -> Result<RawRecord, GitError> {
        let offset = reader.bytes_read() as u64;

        // First byte: high bit = more size bytes, bits 6-4 = type,
        // low 4 bits = size; continuation bytes add 7 bits each.
        let first = read_bytes(reader, 1)?[0];
        let obj_type = ObjectType::from_pack_type_u8((first >> 4) & 0x7)?;
        let mut size = (first & 0x0F) as usize;
        let mut shift = 4;
        let mut byte = first;
        while byte & 0x80 != 0 {
            byte = read_bytes(reader, 1)?[0];
            size |= ((byte & 0x7F) as usize) << shift;
            shift += 7;
        }

        let mut base_offset = None;
        let mut base_hash = None;
        match obj_type {
            ObjectType::OffsetDelta => {
                // Negative-offset varint: each continuation adds (1 << 7).
                let mut byte = read_bytes(reader, 1)?[0];
                let mut distance = (byte & 0x7F) as u64;
                while byte & 0x80 != 0 {
                    byte = read_bytes(reader, 1)?[0];
                    distance = ((distance + 1) << 7) | (byte & 0x7F) as u64;
                }
                if distance == 0 || distance > offset {
                    return Err(GitError::MalformedPack(format!(
                        "ofs-delta base distance {distance} invalid at offset {offset}"
                    )));
                }
                base_offset = Some(offset - distance);
            }
            ObjectType::HashDelta => {
                base_hash = Some(ObjectHash::from_stream(reader)?);
            }
            _ => {}
        }

        // Inflate the object body; the counting reader tells us where the
        // compressed region ends so the next record starts cleanly.
        let body = {
            let counting = CountingReader::new(&mut *reader);
            let mut inflater = ReadBoxed::new_for_delta(counting);
            let mut body = Vec::with_capacity(size);
            inflater.read_to_end(&mut body)?;
            body
        };
        if body.len() != size {
            return Err(GitError::MalformedPack(format!(
                "object at offset {offset} declared {size} bytes, inflated {}",
                body.len()
            )));
        }

        let end = reader.bytes_read() as u64;
        let mut crc = crc32fast::Hasher::new();
        crc.update(&data[offset as usize..end as usize]);

        Ok(RawRecord {
            obj_type,
            data: body,
            offset,
            crc32: crc.finalize(),
            base_offset,
            base_hash,
        })
    }

    /// Second pass: resolve delta chains (LIFO onto a non-delta base) and
    /// compute object ids.
    fn resolve_deltas(
        records: Vec<RawRecord>,
        signature: ObjectHash,
        base_resolver: impl Fn(&ObjectHash) -> Option<(ObjectType, Vec<u8>)>,
    ) -> Result<DecodedPack, GitError> {
        let by_offset: HashMap<u64, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.offset, i))
            .collect();

        let number = records.len();
        let mut resolved: Vec<Option<Entry>> = vec![None; records.len()];
        let mut by_hash: HashMap<ObjectHash, usize> = HashMap::new();

        // Iterative resolution with an explicit chain stack so deep delta
        // chains cannot overflow the call stack.
        for start in 0..records.len() {
            if resolved[start].is_some() {
                continue;
            }
            let mut chain = vec![start];
            loop {
                let top = *chain.last().unwrap();
                let record = &records[top];
                let base: Option<(ObjectType, Vec<u8>)> = if !record.obj_type.is_delta() {
                    Some((record.obj_type, record.data.clone()))
                } else if let Some(base_off) = record.base_offset {
                    let base_idx = *by_offset.get(&base_off).ok_or_else(|| {
                        GitError::MalformedPack(format!(
                            "ofs-delta base offset {base_off} does not start an entry"
                        ))
                    })?;
                    match &resolved[base_idx] {
                        Some(e) => Some((e.obj_type, e.data.clone())),
                        None => {
                            chain.push(base_idx);
                            continue;
                        }
                    }
                } else {
                    let h = record.base_hash.expect("ref-delta carries a base hash");
                    match by_hash.get(&h).and_then(|i| resolved[*i].as_ref()) {
                        Some(e) => Some((e.obj_type, e.data.clone())),
                        None => base_resolver(&h),
                    }
                };

                let (base_type, base_data) = match base {
                    Some(b) => b,
                    None => {
                        return Err(GitError::DeltaObjectError(format!(
                            "missing base for delta at offset {}",
                            record.offset
                        )));
                    }
                };

                let entry = if record.obj_type.is_delta() {
                    let mut cursor = std::io::Cursor::new(&record.data);
                    let target = delta_decode(&mut cursor, &base_data)?;
                    Entry::new(base_type, target)
                } else {
                    Entry::new(base_type, base_data)
                };
                by_hash.insert(entry.hash, top);
                resolved[top] = Some(entry);
                chain.pop();
                if chain.is_empty() {
                    break;
                }
            }
        }

        let entries = records
            .into_iter()
            .zip(resolved)
            .map(|(r, e)| PackedEntry {
                entry: e.expect("all records resolved above"),
                offset: r.offset,
                crc32: r.crc32,
            })
            .collect();

        Ok(DecodedPack {
            number,
            signature,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Pack;
    use crate::{
        errors::GitError,
        internal::{
            object::blob::Blob,
            pack::{encode::PackEncoder, entry::Entry},
        },
    };

    fn no_external_bases(
        _h: &crate::hash::ObjectHash,
    ) -> Option<(crate::internal::object::types::ObjectType, Vec<u8>)> {
        None
    }

    /// A corrupted trailer is rejected as a checksum failure.
    #[test]
    fn corrupt_trailer_rejected() {
        let entries = vec![Entry::from(Blob::from_content("hello\n"))];
        let mut pack = Vec::new();
        PackEncoder::new(0).encode(entries, &mut pack).unwrap();
        let last = pack.len() - 1;
        pack[last] ^= 0xFF;
        let err = Pack::decode(&pack, no_external_bases).unwrap_err();
        assert!(matches!(err, GitError::BadChecksum { .. }));
    }

    /// Garbage header is rejected before any inflation happens.
    #[test]
    fn bad_magic_rejected() {
        let err = Pack::decode(b"JUNKJUNKJUNKJUNKJUNKJUNKJUNKJUNK", no_external_bases).unwrap_err();
        assert!(matches!(err, GitError::MalformedPack(_)));
    }
}
