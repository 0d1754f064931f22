//! Pack index (`.idx`) version 2: a builder that writes the fanout table,
//! sorted hashes, CRC-32s, offsets and trailer digests, and a reader that
//! binary-searches the fanout for object offsets.

use std::io::Write;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use crate::{errors::GitError, hash::ObjectHash, utils::ObjectHasher};

/// The v2 idx magic `\377t0c` followed by version 2.
const IDX_HEADER: [u8; 8] = [0xFF, 0x74, 0x4F, 0x63, 0, 0, 0, 2];

/// One `.idx` record: object id, CRC-32 of the raw pack region, byte offset
/// of the entry inside the pack.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct IdxEntry {
    pub hash: ObjectHash,
    pub crc32: u32,
    pub offset: u64, // 64-bit because offsets may exceed 32 bits
}

/// Builder for a v2 pack index.
pub struct IdxBuilder {
    inner_hash: ObjectHasher,
    pack_hash: ObjectHash,
}

impl IdxBuilder {
    pub fn new(pack_hash: ObjectHash) -> Self {
        Self {
            inner_hash: ObjectHasher::new(),
            pack_hash,
        }
    }

    fn emit(&mut self, out: &mut impl Write, data: &[u8]) -> Result<(), GitError> {
        self.inner_hash.update(data);
        out.write_all(data)?;
        Ok(())
    }

    fn emit_u32(&mut self, out: &mut impl Write, v: u32) -> Result<(), GitError> {
        self.emit(out, &v.to_be_bytes())
    }

    /// Write the complete idx file: header, fanout, names, CRCs, offsets
    /// (with the large-offset extension table), pack hash, idx hash.
    pub fn write_idx(
        mut self,
        mut entries: Vec<IdxEntry>,
        out: &mut impl Write,
    ) -> Result<(), GitError> {
        entries.sort_by(|a, b| a.hash.cmp(&b.hash));

        self.emit(out, &IDX_HEADER)?;

        // Fanout: 256 cumulative counts keyed by the first hash byte.
        let mut fanout = [0u32; 256];
        for entry in entries.iter() {
            fanout[entry.hash.0[0] as usize] += 1;
        }
        for i in 1..fanout.len() {
            fanout[i] += fanout[i - 1];
        }
        for &count in fanout.iter() {
            self.emit_u32(out, count)?;
        }

        for e in &entries {
            self.emit(out, e.hash.as_ref())?;
        }

        for e in &entries {
            self.emit_u32(out, e.crc32)?;
        }

        // 31-bit offsets inline; larger ones spill to the 64-bit table with
        // the MSB marking the spill index.
        let mut large = vec![];
        for e in &entries {
            if e.offset <= 0x7FFF_FFFF {
                self.emit_u32(out, e.offset as u32)?;
            } else {
                let marker = 0x8000_0000 | large.len() as u32;
                self.emit_u32(out, marker)?;
                large.push(e.offset);
            }
        }
        for v in large {
            self.emit(out, &v.to_be_bytes())?;
        }

        let pack_hash = self.pack_hash.to_data();
        self.emit(out, &pack_hash)?;
        let idx_hash = self.inner_hash.finalize();
        out.write_all(idx_hash.as_ref())?;
        Ok(())
    }
}

/// Parsed `.idx` supporting offset lookup and prefix scans.
#[derive(Debug, Clone)]
pub struct PackIndex {
    fanout: [u32; 256],
    hashes: Vec<ObjectHash>,
    offsets: Vec<u64>,
    pub pack_hash: ObjectHash,
}

impl PackIndex {
    /// Parse an idx buffer, verifying its trailer digest.
    pub fn parse(data: &[u8]) -> Result<PackIndex, GitError> {
        if data.len() < 8 + 256 * 4 + 40 || data[..8] != IDX_HEADER {
            return Err(GitError::MalformedPack("bad idx header".to_string()));
        }
        let computed = ObjectHash::new(&data[..data.len() - 20]);
        let recorded = ObjectHash::from_bytes(&data[data.len() - 20..])?;
        if computed != recorded {
            return Err(GitError::BadChecksum {
                expected: recorded.to_string(),
                actual: computed.to_string(),
            });
        }

        let mut fanout = [0u32; 256];
        for (i, item) in fanout.iter_mut().enumerate() {
            *item = BigEndian::read_u32(&data[8 + i * 4..]);
        }
        let count = fanout[255] as usize;

        let names_start = 8 + 256 * 4;
        let crc_start = names_start + count * 20;
        let offsets_start = crc_start + count * 4;
        let large_start = offsets_start + count * 4;
        if data.len() < large_start + 40 {
            return Err(GitError::MalformedPack("idx truncated".to_string()));
        }

        let mut hashes = Vec::with_capacity(count);
        for i in 0..count {
            hashes.push(ObjectHash::from_bytes(
                &data[names_start + i * 20..names_start + (i + 1) * 20],
            )?);
        }

        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let raw = BigEndian::read_u32(&data[offsets_start + i * 4..]);
            if raw & 0x8000_0000 == 0 {
                offsets.push(raw as u64);
            } else {
                let idx = (raw & 0x7FFF_FFFF) as usize;
                let pos = large_start + idx * 8;
                if data.len() < pos + 8 + 40 {
                    return Err(GitError::MalformedPack("idx large offset truncated".to_string()));
                }
                offsets.push(BigEndian::read_u64(&data[pos..]));
            }
        }

        let pack_hash = ObjectHash::from_bytes(&data[data.len() - 40..data.len() - 20])?;
        Ok(PackIndex {
            fanout,
            hashes,
            offsets,
            pack_hash,
        })
    }

    /// Load an idx file from disk.
    pub fn load(path: &Path) -> Result<PackIndex, GitError> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// All object ids in the pack, in hash order.
    pub fn hashes(&self) -> &[ObjectHash] {
        &self.hashes
    }

    /// Binary search within the fanout bucket for the pack offset.
    pub fn offset_of(&self, hash: &ObjectHash) -> Option<u64> {
        let first = hash.0[0] as usize;
        let lo = if first == 0 {
            0
        } else {
            self.fanout[first - 1] as usize
        };
        let hi = self.fanout[first] as usize;
        self.hashes[lo..hi]
            .binary_search(hash)
            .ok()
            .map(|i| self.offsets[lo + i])
    }

    /// All ids starting with the given hex prefix (for revision lookup).
    pub fn prefix_matches(&self, prefix: &str) -> Vec<ObjectHash> {
        self.hashes
            .iter()
            .filter(|h| h.to_string().starts_with(prefix))
            .copied()
            .collect()
    }
}
