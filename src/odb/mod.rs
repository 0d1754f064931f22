//! Unified object database: a single interface to read and write objects
//! across loose storage and pack files. Readers probe loose files first,
//! then each pack; writers always produce loose objects, and received packs
//! are exploded into loose storage after thin-delta completion.

pub mod loose;
pub mod packed;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use loose::LooseStore;
use packed::PackHandle;

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::{
        object::{
            ObjectTrait,
            blob::Blob,
            commit::Commit,
            tag::Tag,
            tree::{Tree, TreeItemMode},
            types::ObjectType,
        },
        pack::decode::Pack,
    },
};

/// Object database rooted at a repository's `objects/` directory.
pub struct ObjectStore {
    objects_dir: PathBuf,
    loose: LooseStore,
    packs: Vec<PackHandle>,
}

impl ObjectStore {
    /// Open the database, scanning `objects/pack` for existing packs.
    pub fn open(objects_dir: impl AsRef<Path>) -> Result<ObjectStore, GitError> {
        let objects_dir = objects_dir.as_ref().to_path_buf();
        let loose = LooseStore::new(&objects_dir);
        let packs = packed::scan_packs(&objects_dir.join("pack"))?;
        Ok(ObjectStore {
            objects_dir,
            loose,
            packs,
        })
    }

    /// Re-scan the pack directory (after a fetch stored a new pack).
    pub fn reload_packs(&mut self) -> Result<(), GitError> {
        self.packs = packed::scan_packs(&self.objects_dir.join("pack"))?;
        Ok(())
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Whether the object exists in either backend.
    pub fn has(&self, hash: &ObjectHash) -> bool {
        self.loose.has(hash) || self.packs.iter().any(|p| p.has(hash))
    }

    /// Read an object's type and body, or `None` when absent.
    pub fn try_read(&self, hash: &ObjectHash) -> Result<Option<(ObjectType, Vec<u8>)>, GitError> {
        if let Some(found) = self.loose.read(hash)? {
            return Ok(Some(found));
        }
        let resolver = |h: &ObjectHash| self.loose.read(h).ok().flatten();
        for pack in &self.packs {
            if let Some(found) = pack.read(hash, &resolver)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Read an object's type and body, failing with `ObjectNotFound`.
    pub fn read(&self, hash: &ObjectHash) -> Result<(ObjectType, Vec<u8>), GitError> {
        self.try_read(hash)?
            .ok_or_else(|| GitError::ObjectNotFound(hash.to_string()))
    }

    /// Write framed content as a loose object, returning its id.
    pub fn write(&self, obj_type: ObjectType, data: &[u8]) -> Result<ObjectHash, GitError> {
        self.loose.write(obj_type, data)
    }

    /// Write a typed object.
    pub fn write_obj(&self, obj: &impl ObjectTrait) -> Result<ObjectHash, GitError> {
        self.write(obj.get_type(), &obj.to_data()?)
    }

    fn read_expecting(
        &self,
        hash: &ObjectHash,
        expected: ObjectType,
    ) -> Result<Vec<u8>, GitError> {
        let (obj_type, data) = self.read(hash)?;
        if obj_type != expected {
            return Err(GitError::InvalidObjectType(format!(
                "{hash} is a {obj_type}, expected {expected}"
            )));
        }
        Ok(data)
    }

    pub fn read_commit(&self, hash: &ObjectHash) -> Result<Commit, GitError> {
        Commit::from_bytes(&self.read_expecting(hash, ObjectType::Commit)?, *hash)
    }

    pub fn read_tree(&self, hash: &ObjectHash) -> Result<Tree, GitError> {
        Tree::from_bytes(&self.read_expecting(hash, ObjectType::Tree)?, *hash)
    }

    pub fn read_blob(&self, hash: &ObjectHash) -> Result<Blob, GitError> {
        Blob::from_bytes(&self.read_expecting(hash, ObjectType::Blob)?, *hash)
    }

    pub fn read_tag(&self, hash: &ObjectHash) -> Result<Tag, GitError> {
        Tag::from_bytes(&self.read_expecting(hash, ObjectType::Tag)?, *hash)
    }

    /// Peel a ref target to a commit: tags are followed to their object.
    pub fn peel_to_commit(&self, hash: &ObjectHash) -> Result<Commit, GitError> {
        let (obj_type, data) = self.read(hash)?;
        match obj_type {
            ObjectType::Commit => Commit::from_bytes(&data, *hash),
            ObjectType::Tag => {
                let tag = Tag::from_bytes(&data, *hash)?;
                self.peel_to_commit(&tag.object_hash)
            }
            other => Err(GitError::InvalidObjectType(format!(
                "{hash} is a {other}, expected commit"
            ))),
        }
    }

    /// All object ids across both backends.
    pub fn iter_objects(&self) -> Result<Vec<ObjectHash>, GitError> {
        let mut out = self.loose.iter()?;
        for pack in &self.packs {
            out.extend_from_slice(pack.index.hashes());
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Ids whose hex form starts with `prefix` (>= 2 chars), across both
    /// backends.
    pub fn prefix_matches(&self, prefix: &str) -> Result<Vec<ObjectHash>, GitError> {
        let mut out = self.loose.prefix_matches(prefix)?;
        for pack in &self.packs {
            out.extend(pack.index.prefix_matches(prefix));
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Explode a received pack into loose storage. Thin-pack deltas resolve
    /// against objects already in the store. Returns the pack signature and
    /// the ids written, in pack order.
    pub fn unpack(&self, pack_data: &[u8]) -> Result<(ObjectHash, Vec<ObjectHash>), GitError> {
        let resolver = |h: &ObjectHash| self.try_read(h).ok().flatten();
        let decoded = Pack::decode(pack_data, resolver)?;
        let mut written = Vec::with_capacity(decoded.entries.len());
        for packed in &decoded.entries {
            let hash = self.write(packed.entry.obj_type, &packed.entry.data)?;
            written.push(hash);
        }
        tracing::debug!(objects = written.len(), pack = %decoded.signature, "unpacked");
        Ok((decoded.signature, written))
    }
}

/// Flatten a tree to `path -> (mode, blob_hash)`, recursing into subtrees.
/// Gitlink entries are carried through without recursion.
pub fn flatten_tree(
    store: &ObjectStore,
    tree_hash: &ObjectHash,
) -> Result<BTreeMap<String, (TreeItemMode, ObjectHash)>, GitError> {
    let mut out = BTreeMap::new();
    flatten_into(store, tree_hash, "", &mut out)?;
    Ok(out)
}

fn flatten_into(
    store: &ObjectStore,
    tree_hash: &ObjectHash,
    prefix: &str,
    out: &mut BTreeMap<String, (TreeItemMode, ObjectHash)>,
) -> Result<(), GitError> {
    let tree = store.read_tree(tree_hash)?;
    for item in &tree.tree_items {
        let path = if prefix.is_empty() {
            item.name.clone()
        } else {
            format!("{prefix}/{}", item.name)
        };
        if item.mode.is_tree() {
            flatten_into(store, &item.id, &path, out)?;
        } else {
            out.insert(path, (item.mode, item.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ObjectStore, flatten_tree};
    use crate::internal::{
        object::{
            blob::Blob,
            tree::{Tree, TreeItem, TreeItemMode},
            types::ObjectType,
        },
        pack::{encode::PackEncoder, entry::Entry},
    };

    fn open_store(dir: &std::path::Path) -> ObjectStore {
        ObjectStore::open(dir).unwrap()
    }

    /// Loose write + read and existence across backends.
    #[test]
    fn loose_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let hash = store.write(ObjectType::Blob, b"hello\n").unwrap();
        assert!(store.has(&hash));
        let (t, d) = store.read(&hash).unwrap();
        assert_eq!(t, ObjectType::Blob);
        assert_eq!(d, b"hello\n");
        let blob = store.read_blob(&hash).unwrap();
        assert_eq!(blob.data, b"hello\n");
    }

    /// Typed readers reject type confusion.
    #[test]
    fn typed_read_checks_type() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let hash = store.write(ObjectType::Blob, b"not a commit").unwrap();
        assert!(store.read_commit(&hash).is_err());
    }

    /// unpack explodes a pack into loose objects readable afterwards.
    #[test]
    fn unpack_pack_into_loose() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let entries = vec![
            Entry::from(Blob::from_content("one\n")),
            Entry::from(Blob::from_content("two\n")),
        ];
        let mut pack = Vec::new();
        PackEncoder::new(0).encode(entries.clone(), &mut pack).unwrap();

        let (_sig, written) = store.unpack(&pack).unwrap();
        assert_eq!(written.len(), 2);
        for e in &entries {
            assert!(store.has(&e.hash));
        }
    }

    /// Thin deltas resolve against objects already in the store.
    #[test]
    fn unpack_thin_pack() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        // Base lives only in the store, not in the pack.
        let base = "base line one\nbase line two\nbase line three\n".repeat(4);
        let base_blob = Blob::from_content(&base);
        store.write_obj(&base_blob).unwrap();

        let target = Blob::from_content(&format!("{base}target extra\n"));
        let delta = crate::delta::encode::DeltaScript::between(&base_blob.data, &target.data).encode();

        // Hand-build a one-entry thin pack with a ref-delta.
        let mut body = Vec::new();
        body.extend_from_slice(b"PACK");
        body.extend_from_slice(&2u32.to_be_bytes());
        body.extend_from_slice(&1u32.to_be_bytes());
        // entry header: type 7 (ref-delta), size = delta.len()
        let mut size = delta.len();
        let mut byte = (7u8 << 4) | (size & 0x0F) as u8;
        size >>= 4;
        let mut header = Vec::new();
        while size > 0 {
            header.push(byte | 0x80);
            byte = (size & 0x7F) as u8;
            size >>= 7;
        }
        header.push(byte);
        body.extend_from_slice(&header);
        body.extend_from_slice(base_blob.id.as_ref());
        {
            use std::io::Write;
            let mut enc =
                flate2::write::ZlibEncoder::new(&mut body, flate2::Compression::default());
            enc.write_all(&delta).unwrap();
            enc.finish().unwrap();
        }
        let trailer = crate::hash::ObjectHash::new(&body);
        body.extend_from_slice(trailer.as_ref());

        let (_sig, written) = store.unpack(&body).unwrap();
        assert_eq!(written, vec![target.id]);
        assert_eq!(store.read_blob(&target.id).unwrap().data, target.data);
    }

    /// flatten_tree walks nested trees into full paths.
    #[test]
    fn flatten_nested_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let inner_blob = Blob::from_content("inner\n");
        store.write_obj(&inner_blob).unwrap();
        let inner = Tree::from_tree_items(vec![TreeItem::new(
            TreeItemMode::Blob,
            inner_blob.id,
            "file.txt".to_string(),
        )])
        .unwrap();
        store.write_obj(&inner).unwrap();

        let outer_blob = Blob::from_content("outer\n");
        store.write_obj(&outer_blob).unwrap();
        let outer = Tree::from_tree_items(vec![
            TreeItem::new(TreeItemMode::Tree, inner.id, "sub".to_string()),
            TreeItem::new(TreeItemMode::Blob, outer_blob.id, "top.txt".to_string()),
        ])
        .unwrap();
        store.write_obj(&outer).unwrap();

        let flat = flatten_tree(&store, &outer.id).unwrap();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat["sub/file.txt"].1, inner_blob.id);
        assert_eq!(flat["top.txt"].1, outer_blob.id);
    }
}
