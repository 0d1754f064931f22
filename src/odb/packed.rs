//! Packed object storage: `objects/pack/pack-<id>.{pack,idx}` pairs. The
//! idx locates objects by binary search; reads seek into the pack, inflate
//! the entry, and follow OFS/REF delta chains to a non-delta base.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::{
    delta::decode::delta_decode,
    errors::GitError,
    hash::ObjectHash,
    internal::{
        object::types::ObjectType, pack::pack_index::PackIndex,
        zlib::stream::inflate::ReadBoxed,
    },
};

/// Resolves delta bases that live outside the pack being read.
pub type BaseResolver<'a> = &'a dyn Fn(&ObjectHash) -> Option<(ObjectType, Vec<u8>)>;

/// One `.pack`/`.idx` pair on disk.
pub struct PackHandle {
    pub index: PackIndex,
    pack_path: PathBuf,
}

impl PackHandle {
    pub fn open(idx_path: &Path) -> Result<PackHandle, GitError> {
        let index = PackIndex::load(idx_path)?;
        let pack_path = idx_path.with_extension("pack");
        if !pack_path.is_file() {
            return Err(GitError::MalformedPack(format!(
                "idx without pack: {}",
                idx_path.display()
            )));
        }
        Ok(PackHandle { index, pack_path })
    }

    pub fn has(&self, hash: &ObjectHash) -> bool {
        self.index.offset_of(hash).is_some()
    }

    /// Read an object by id, following delta chains. `resolver` supplies
    /// bases stored outside this pack.
    pub fn read(
        &self,
        hash: &ObjectHash,
        resolver: BaseResolver,
    ) -> Result<Option<(ObjectType, Vec<u8>)>, GitError> {
        match self.index.offset_of(hash) {
            Some(offset) => self.read_at(offset, resolver).map(Some),
            None => Ok(None),
        }
    }

    /// Decode the entry that starts at `offset`.
    fn read_at(
        &self,
        offset: u64,
        resolver: BaseResolver,
    ) -> Result<(ObjectType, Vec<u8>), GitError> {
        let file = File::open(&self.pack_path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset))?;

        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        let obj_type = ObjectType::from_pack_type_u8((byte[0] >> 4) & 0x7)?;
        let mut size = (byte[0] & 0x0F) as usize;
        let mut shift = 4;
        let mut cont = byte[0];
        while cont & 0x80 != 0 {
            reader.read_exact(&mut byte)?;
            cont = byte[0];
            size |= ((cont & 0x7F) as usize) << shift;
            shift += 7;
        }

        match obj_type {
            ObjectType::OffsetDelta => {
                reader.read_exact(&mut byte)?;
                let mut distance = (byte[0] & 0x7F) as u64;
                let mut cont = byte[0];
                while cont & 0x80 != 0 {
                    reader.read_exact(&mut byte)?;
                    cont = byte[0];
                    distance = ((distance + 1) << 7) | (cont & 0x7F) as u64;
                }
                if distance == 0 || distance > offset {
                    return Err(GitError::MalformedPack(format!(
                        "ofs-delta base distance {distance} invalid at offset {offset}"
                    )));
                }
                let delta = Self::inflate(&mut reader, size, offset)?;
                let (base_type, base_data) = self.read_at(offset - distance, resolver)?;
                let mut cursor = std::io::Cursor::new(delta);
                Ok((base_type, delta_decode(&mut cursor, &base_data)?))
            }
            ObjectType::HashDelta => {
                let base_hash = ObjectHash::from_stream(&mut reader)?;
                let delta = Self::inflate(&mut reader, size, offset)?;
                let (base_type, base_data) = match self.index.offset_of(&base_hash) {
                    Some(base_off) => self.read_at(base_off, resolver)?,
                    None => resolver(&base_hash).ok_or_else(|| {
                        GitError::DeltaObjectError(format!(
                            "missing base {base_hash} for delta at offset {offset}"
                        ))
                    })?,
                };
                let mut cursor = std::io::Cursor::new(delta);
                Ok((base_type, delta_decode(&mut cursor, &base_data)?))
            }
            _ => Ok((obj_type, Self::inflate(&mut reader, size, offset)?)),
        }
    }

    fn inflate(
        reader: &mut BufReader<File>,
        size: usize,
        offset: u64,
    ) -> Result<Vec<u8>, GitError> {
        let mut inflater = ReadBoxed::new_for_delta(reader);
        let mut body = Vec::with_capacity(size);
        inflater.read_to_end(&mut body)?;
        if body.len() != size {
            return Err(GitError::MalformedPack(format!(
                "entry at offset {offset} declared {size} bytes, inflated {}",
                body.len()
            )));
        }
        Ok(body)
    }
}

/// Scan `objects/pack` for idx/pack pairs. Unreadable pairs are skipped
/// with a warning so one corrupt pack cannot take the repository down.
pub fn scan_packs(pack_dir: &Path) -> Result<Vec<PackHandle>, GitError> {
    let mut packs = Vec::new();
    let dir = match fs::read_dir(pack_dir) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(packs),
        Err(e) => return Err(e.into()),
    };
    for entry in dir {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("idx") {
            continue;
        }
        match PackHandle::open(&path) {
            Ok(handle) => packs.push(handle),
            Err(e) => tracing::warn!(idx = %path.display(), error = %e, "skipping unreadable pack"),
        }
    }
    Ok(packs)
}
