//! The staging area: an ordered `path -> (mode, hash, stat-cache)` table
//! persisted in the binary `index` file (version 2, `DIRC` signature,
//! SHA-1 trailer). The stat cache lets unchanged files be detected without
//! re-hashing; stages 1/2/3 hold base/ours/theirs during merge conflicts.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::tree::{Tree, TreeItem, TreeItemMode},
    odb::{ObjectStore, flatten_tree},
    utils::ObjectHasher,
};

const INDEX_SIGNATURE: &[u8; 4] = b"DIRC";
const INDEX_VERSION: u32 = 2;
/// Fixed bytes per entry before the path: 10 stat words, hash, flags.
const ENTRY_FIXED_LEN: usize = 62;

/// Merge stages: 0 resolved, 1 base, 2 ours, 3 theirs.
pub const STAGE_RESOLVED: u8 = 0;
pub const STAGE_BASE: u8 = 1;
pub const STAGE_OURS: u8 = 2;
pub const STAGE_THEIRS: u8 = 3;

/// One staged path with its stat cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub ctime_s: u32,
    pub ctime_ns: u32,
    pub mtime_s: u32,
    pub mtime_ns: u32,
    pub dev: u32,
    pub ino: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub hash: ObjectHash,
    pub flags: u16,
    pub path: String,
}

impl IndexEntry {
    /// Entry with a zeroed stat cache (e.g. populated from a tree).
    pub fn bare(path: String, mode: u32, hash: ObjectHash) -> IndexEntry {
        let flags = (path.len().min(0xFFF)) as u16;
        IndexEntry {
            ctime_s: 0,
            ctime_ns: 0,
            mtime_s: 0,
            mtime_ns: 0,
            dev: 0,
            ino: 0,
            mode,
            uid: 0,
            gid: 0,
            size: 0,
            hash,
            flags,
            path,
        }
    }

    /// Entry with the stat cache filled from filesystem metadata.
    pub fn from_metadata(
        path: String,
        mode: u32,
        hash: ObjectHash,
        meta: &fs::Metadata,
    ) -> IndexEntry {
        let mut entry = IndexEntry::bare(path, mode, hash);
        entry.refresh_stat(meta);
        entry
    }

    /// Overwrite the stat cache from fresh metadata.
    pub fn refresh_stat(&mut self, meta: &fs::Metadata) {
        let (ctime_s, ctime_ns, mtime_s, mtime_ns, dev, ino, uid, gid, size) = stat_fields(meta);
        self.ctime_s = ctime_s;
        self.ctime_ns = ctime_ns;
        self.mtime_s = mtime_s;
        self.mtime_ns = mtime_ns;
        self.dev = dev;
        self.ino = ino;
        self.uid = uid;
        self.gid = gid;
        self.size = size;
    }

    pub fn stage(&self) -> u8 {
        ((self.flags >> 12) & 0x3) as u8
    }

    pub fn set_stage(&mut self, stage: u8) {
        self.flags = (self.flags & !0x3000) | (((stage as u16) & 0x3) << 12);
    }

    /// Whether cached stat fields still match the filesystem.
    fn stat_matches(&self, meta: &fs::Metadata) -> bool {
        let (ctime_s, _ctime_ns, mtime_s, _mtime_ns, dev, ino, _uid, _gid, size) =
            stat_fields(meta);
        self.size == size
            && self.mtime_s == mtime_s
            && self.ctime_s == ctime_s
            && self.dev == dev
            && self.ino == ino
    }
}

#[cfg(unix)]
fn stat_fields(meta: &fs::Metadata) -> (u32, u32, u32, u32, u32, u32, u32, u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (
        meta.ctime() as u32,
        meta.ctime_nsec() as u32,
        meta.mtime() as u32,
        meta.mtime_nsec() as u32,
        meta.dev() as u32,
        meta.ino() as u32,
        meta.uid() as u32,
        meta.gid() as u32,
        meta.len() as u32,
    )
}

#[cfg(not(unix))]
fn stat_fields(meta: &fs::Metadata) -> (u32, u32, u32, u32, u32, u32, u32, u32, u32) {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| (d.as_secs() as u32, d.subsec_nanos()))
        .unwrap_or((0, 0));
    (mtime.0, mtime.1, mtime.0, mtime.1, 0, 0, 0, 0, meta.len() as u32)
}

/// Index diff against a tree (what is staged relative to HEAD).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TreeDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

/// Index diff against the working directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkdirDiff {
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

/// The staging area, entries sorted by (path bytes, stage).
#[derive(Debug, Default, Clone)]
pub struct Index {
    entries: Vec<IndexEntry>,
}

impl Index {
    pub fn empty() -> Index {
        Index::default()
    }

    /// Parse the binary index file; a missing file is an empty index.
    pub fn load(path: &Path) -> Result<Index, GitError> {
        let data = match fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Index::empty()),
            Err(e) => return Err(e.into()),
        };
        Self::parse(&data)
    }

    fn parse(data: &[u8]) -> Result<Index, GitError> {
        if data.len() < 12 + 20 || &data[..4] != INDEX_SIGNATURE {
            return Err(GitError::InvalidIndexFile("bad signature".to_string()));
        }
        let version = BigEndian::read_u32(&data[4..]);
        if version != INDEX_VERSION {
            return Err(GitError::InvalidIndexFile(format!(
                "unsupported version {version}"
            )));
        }
        let recorded = ObjectHash::from_bytes(&data[data.len() - 20..])?;
        let computed = ObjectHash::new(&data[..data.len() - 20]);
        if recorded != computed {
            return Err(GitError::BadChecksum {
                expected: recorded.to_string(),
                actual: computed.to_string(),
            });
        }

        let count = BigEndian::read_u32(&data[8..]) as usize;
        let mut entries = Vec::with_capacity(count);
        let mut pos = 12;
        for _ in 0..count {
            if data.len() < pos + ENTRY_FIXED_LEN {
                return Err(GitError::InvalidIndexFile("truncated entry".to_string()));
            }
            let e = &data[pos..];
            let flags = BigEndian::read_u16(&e[60..]);
            let name_len = (flags & 0x0FFF) as usize;
            let path_end = pos + ENTRY_FIXED_LEN + name_len;
            if data.len() < path_end {
                return Err(GitError::InvalidIndexFile("truncated path".to_string()));
            }
            let path = String::from_utf8_lossy(&data[pos + ENTRY_FIXED_LEN..path_end]).to_string();
            entries.push(IndexEntry {
                ctime_s: BigEndian::read_u32(&e[0..]),
                ctime_ns: BigEndian::read_u32(&e[4..]),
                mtime_s: BigEndian::read_u32(&e[8..]),
                mtime_ns: BigEndian::read_u32(&e[12..]),
                dev: BigEndian::read_u32(&e[16..]),
                ino: BigEndian::read_u32(&e[20..]),
                mode: BigEndian::read_u32(&e[24..]),
                uid: BigEndian::read_u32(&e[28..]),
                gid: BigEndian::read_u32(&e[32..]),
                size: BigEndian::read_u32(&e[36..]),
                hash: ObjectHash::from_bytes(&e[40..60])?,
                flags,
                path,
            });
            // Entries are NUL-padded to 8-byte boundaries (minimum one NUL).
            let entry_len = (ENTRY_FIXED_LEN + name_len + 8) / 8 * 8;
            pos += entry_len;
        }
        // Anything between the entries and the trailer is extension data;
        // unknown extensions are skipped.
        Ok(Index { entries })
    }

    /// Serialize and atomically replace the index file (temp, fsync,
    /// rename).
    pub fn save(&self, path: &Path) -> Result<(), GitError> {
        let mut body = Vec::new();
        body.extend_from_slice(INDEX_SIGNATURE);
        body.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        body.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            let start = body.len();
            for word in [
                entry.ctime_s,
                entry.ctime_ns,
                entry.mtime_s,
                entry.mtime_ns,
                entry.dev,
                entry.ino,
                entry.mode,
                entry.uid,
                entry.gid,
                entry.size,
            ] {
                body.extend_from_slice(&word.to_be_bytes());
            }
            body.extend_from_slice(entry.hash.as_ref());
            let flags =
                (entry.flags & 0xF000) | (entry.path.len().min(0xFFF) as u16);
            body.extend_from_slice(&flags.to_be_bytes());
            body.extend_from_slice(entry.path.as_bytes());
            let written = body.len() - start;
            let padded = (written + 8) / 8 * 8;
            body.resize(start + padded, 0);
        }
        let mut hasher = ObjectHasher::new();
        hasher.update(&body);
        let digest = hasher.finalize();
        body.extend_from_slice(digest.as_ref());

        let dir = path
            .parent()
            .ok_or_else(|| GitError::InvalidIndexFile("index path has no parent".to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| GitError::IOError(e.error))?;
        Ok(())
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn position(&self, path: &str, stage: u8) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| (e.path.as_str(), e.stage()).cmp(&(path, stage)))
    }

    pub fn entry(&self, path: &str, stage: u8) -> Option<&IndexEntry> {
        self.position(path, stage).ok().map(|i| &self.entries[i])
    }

    /// Insert or replace the entry at its (path, stage) slot.
    pub fn add_entry(&mut self, entry: IndexEntry) {
        match self.position(&entry.path, entry.stage()) {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    /// Stage a path at stage 0, dropping any conflict stages it carried.
    pub fn add(&mut self, path: &str, mode: u32, hash: ObjectHash, meta: &fs::Metadata) {
        self.remove(path);
        self.add_entry(IndexEntry::from_metadata(path.to_string(), mode, hash, meta));
    }

    /// Remove every stage of a path. Returns whether anything was removed.
    pub fn remove(&mut self, path: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.path != path);
        before != self.entries.len()
    }

    /// Record an unresolved three-way conflict for a path: the present
    /// sides land at stages 1/2/3 and any stage-0 entry is dropped.
    pub fn add_conflict(
        &mut self,
        path: &str,
        base: Option<(u32, ObjectHash)>,
        ours: Option<(u32, ObjectHash)>,
        theirs: Option<(u32, ObjectHash)>,
    ) {
        self.remove(path);
        for (stage, side) in [(STAGE_BASE, base), (STAGE_OURS, ours), (STAGE_THEIRS, theirs)] {
            if let Some((mode, hash)) = side {
                let mut entry = IndexEntry::bare(path.to_string(), mode, hash);
                entry.set_stage(stage);
                self.add_entry(entry);
            }
        }
    }

    /// Paths that still carry conflict stages.
    pub fn conflict_paths(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.stage() != STAGE_RESOLVED)
            .map(|e| e.path.clone())
            .collect();
        out.dedup();
        out
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(|e| e.stage() != STAGE_RESOLVED)
    }

    /// Stage-0 view as `path -> (mode, hash)`.
    pub fn flat(&self) -> BTreeMap<String, (u32, ObjectHash)> {
        self.entries
            .iter()
            .filter(|e| e.stage() == STAGE_RESOLVED)
            .map(|e| (e.path.clone(), (e.mode, e.hash)))
            .collect()
    }

    /// Replace the index content with a tree's flattened listing (stat
    /// caches zeroed, so the next status pass re-stats everything).
    pub fn read_tree(&mut self, store: &ObjectStore, tree: &ObjectHash) -> Result<(), GitError> {
        let flat = flatten_tree(store, tree)?;
        self.entries.clear();
        for (path, (mode, hash)) in flat {
            self.add_entry(IndexEntry::bare(path, mode.to_index_mode(), hash));
        }
        Ok(())
    }

    /// Build the hierarchical tree objects for the stage-0 entries,
    /// deepest subtrees first, writing each created tree to the store and
    /// returning the root id. Refuses while conflicts are unresolved.
    pub fn build_tree(&self, store: &ObjectStore) -> Result<ObjectHash, GitError> {
        if self.has_conflicts() {
            return Err(GitError::MergeConflict(self.conflict_paths()));
        }

        enum Node {
            File(u32, ObjectHash),
            Dir(BTreeMap<String, Node>),
        }

        let mut root: BTreeMap<String, Node> = BTreeMap::new();
        for entry in &self.entries {
            let mut cursor = &mut root;
            let mut components = entry.path.split('/').peekable();
            while let Some(component) = components.next() {
                if components.peek().is_none() {
                    cursor.insert(component.to_string(), Node::File(entry.mode, entry.hash));
                } else {
                    let next = cursor
                        .entry(component.to_string())
                        .or_insert_with(|| Node::Dir(BTreeMap::new()));
                    cursor = match next {
                        Node::Dir(map) => map,
                        Node::File(..) => {
                            return Err(GitError::InvalidIndexFile(format!(
                                "{} is both a file and a directory",
                                entry.path
                            )));
                        }
                    };
                }
            }
        }

        fn write_level(
            store: &ObjectStore,
            level: &BTreeMap<String, Node>,
        ) -> Result<ObjectHash, GitError> {
            let mut items = Vec::with_capacity(level.len());
            for (name, node) in level {
                match node {
                    Node::File(mode, hash) => {
                        items.push(TreeItem::new(
                            TreeItemMode::from_index_mode(*mode)?,
                            *hash,
                            name.clone(),
                        ));
                    }
                    Node::Dir(children) => {
                        let sub = write_level(store, children)?;
                        items.push(TreeItem::new(TreeItemMode::Tree, sub, name.clone()));
                    }
                }
            }
            let tree = Tree::from_tree_items(items)?;
            store.write_obj(&tree)?;
            Ok(tree.id)
        }

        write_level(store, &root)
    }

    /// Compare a tree (usually HEAD's) against the stage-0 entries.
    pub fn diff_tree(
        &self,
        store: &ObjectStore,
        tree: Option<&ObjectHash>,
    ) -> Result<TreeDiff, GitError> {
        let tree_flat = match tree {
            Some(t) => flatten_tree(store, t)?,
            None => BTreeMap::new(),
        };
        let index_flat = self.flat();

        let mut diff = TreeDiff::default();
        for (path, (mode, hash)) in &index_flat {
            match tree_flat.get(path) {
                None => diff.added.push(path.clone()),
                Some((tree_mode, tree_hash)) => {
                    if tree_hash != hash || tree_mode.to_index_mode() != *mode {
                        diff.modified.push(path.clone());
                    }
                }
            }
        }
        for path in tree_flat.keys() {
            if !index_flat.contains_key(path) {
                diff.deleted.push(path.clone());
            }
        }
        Ok(diff)
    }

    /// Compare the working directory against the stage-0 entries. When
    /// only timestamps changed but content matches, the stat cache is
    /// refreshed in place instead of reporting a modification.
    pub fn diff_workdir(&mut self, workdir: &Path) -> Result<WorkdirDiff, GitError> {
        let mut diff = WorkdirDiff::default();
        for entry in &mut self.entries {
            if entry.stage() != STAGE_RESOLVED {
                continue;
            }
            let file = workdir.join(&entry.path);
            let meta = match fs::symlink_metadata(&file) {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    diff.deleted.push(entry.path.clone());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if entry.stat_matches(&meta) {
                continue;
            }
            let actual = hash_workfile(&file, entry.mode)?;
            if actual == entry.hash {
                entry.refresh_stat(&meta);
            } else {
                diff.modified.push(entry.path.clone());
            }
        }
        Ok(diff)
    }
}

/// Hash a working file the way `write(Blob, content)` would, without
/// writing. Symlink entries hash their target path.
pub fn hash_workfile(file: &Path, mode: u32) -> Result<ObjectHash, GitError> {
    use crate::internal::object::types::ObjectType;
    let content = if mode == 0o120000 {
        fs::read_link(file)?
            .to_string_lossy()
            .as_bytes()
            .to_vec()
    } else {
        fs::read(file)?
    };
    Ok(ObjectHash::from_type_and_data(ObjectType::Blob, &content))
}

/// Pick the index mode for a working file from its metadata.
pub fn mode_for(meta: &fs::Metadata) -> u32 {
    if meta.file_type().is_symlink() {
        return 0o120000;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if meta.mode() & 0o111 != 0 {
            return 0o100755;
        }
    }
    0o100644
}
