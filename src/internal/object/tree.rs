//! The Tree object represents one directory level: an ordered list of
//! `(mode, name, hash)` entries pointing at blobs, subtrees, symlinks, and
//! gitlinks. Entries are sorted the way Git sorts them, with directory
//! names compared as if they carried a trailing `/`.

use std::cmp::Ordering;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{ObjectTrait, types::ObjectType},
};

/// File mode of a tree entry. The serialized form is the octal string Git
/// writes: `100644`, `100755`, `120000`, `40000`, `160000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeItemMode {
    Blob,
    BlobExecutable,
    Link,
    Tree,
    Commit,
}

impl Display for TreeItemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(std::str::from_utf8(self.to_bytes()).unwrap())
    }
}

impl TreeItemMode {
    /// The octal mode string as written into tree object bodies.
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            TreeItemMode::Blob => b"100644",
            TreeItemMode::BlobExecutable => b"100755",
            TreeItemMode::Link => b"120000",
            TreeItemMode::Tree => b"40000",
            TreeItemMode::Commit => b"160000",
        }
    }

    /// Parse a mode string from a tree body. Git tolerates zero-padded
    /// directory modes (`040000`) written by some implementations.
    pub fn from_bytes(mode: &[u8]) -> Result<TreeItemMode, GitError> {
        match mode {
            b"100644" | b"100664" => Ok(TreeItemMode::Blob),
            b"100755" => Ok(TreeItemMode::BlobExecutable),
            b"120000" => Ok(TreeItemMode::Link),
            b"40000" | b"040000" => Ok(TreeItemMode::Tree),
            b"160000" => Ok(TreeItemMode::Commit),
            _ => Err(GitError::InvalidTreeItem(
                String::from_utf8_lossy(mode).to_string(),
            )),
        }
    }

    /// The numeric mode as stored in the staging area.
    pub fn to_index_mode(self) -> u32 {
        match self {
            TreeItemMode::Blob => 0o100644,
            TreeItemMode::BlobExecutable => 0o100755,
            TreeItemMode::Link => 0o120000,
            TreeItemMode::Tree => 0o040000,
            TreeItemMode::Commit => 0o160000,
        }
    }

    /// Map a staging-area mode back to a tree entry mode.
    pub fn from_index_mode(mode: u32) -> Result<TreeItemMode, GitError> {
        match mode {
            0o100644 => Ok(TreeItemMode::Blob),
            0o100755 => Ok(TreeItemMode::BlobExecutable),
            0o120000 => Ok(TreeItemMode::Link),
            0o040000 => Ok(TreeItemMode::Tree),
            0o160000 => Ok(TreeItemMode::Commit),
            _ => Err(GitError::InvalidTreeItem(format!("mode {mode:o}"))),
        }
    }

    pub fn is_tree(self) -> bool {
        self == TreeItemMode::Tree
    }
}

/// One `(mode, name, hash)` entry of a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectHash,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectHash, name: String) -> TreeItem {
        TreeItem { mode, id, name }
    }

    /// Serialized form: `<mode> <name>\0<20-byte hash>`.
    pub fn to_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.name.len() + 28);
        data.extend_from_slice(self.mode.to_bytes());
        data.push(b' ');
        data.extend_from_slice(self.name.as_bytes());
        data.push(b'\x00');
        data.extend_from_slice(self.id.as_ref());
        data
    }
}

/// Compare entry names the way Git does: a directory sorts as if its name
/// had a trailing `/`, so `foo` (dir) comes after `foo.txt`.
fn git_entry_cmp(a: &TreeItem, b: &TreeItem) -> Ordering {
    let a_bytes = a.name.as_bytes();
    let b_bytes = b.name.as_bytes();
    let common = a_bytes.len().min(b_bytes.len());
    match a_bytes[..common].cmp(&b_bytes[..common]) {
        Ordering::Equal => {}
        other => return other,
    }
    let a_next = a_bytes
        .get(common)
        .copied()
        .unwrap_or(if a.mode.is_tree() { b'/' } else { 0 });
    let b_next = b_bytes
        .get(common)
        .copied()
        .unwrap_or(if b.mode.is_tree() { b'/' } else { 0 });
    a_next.cmp(&b_next)
}

/// A full directory listing, entries kept in canonical sorted order.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub id: ObjectHash,
    pub tree_items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree {}", self.id)?;
        for item in &self.tree_items {
            writeln!(f, "{} {} {}", item.mode, item.id, item.name)?;
        }
        Ok(())
    }
}

impl Tree {
    /// Build a tree from entries, sorting them canonically and computing
    /// the id. An empty entry list is valid (the empty tree).
    pub fn from_tree_items(mut tree_items: Vec<TreeItem>) -> Result<Tree, GitError> {
        tree_items.sort_by(git_entry_cmp);
        let mut tree = Tree {
            id: ObjectHash::default(),
            tree_items,
        };
        tree.id = ObjectHash::from_type_and_data(ObjectType::Tree, &tree.to_data()?);
        Ok(tree)
    }

    /// Look up a direct child by name.
    pub fn item(&self, name: &str) -> Option<&TreeItem> {
        self.tree_items.iter().find(|i| i.name == name)
    }
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        let mut tree_items = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let space = memchr::memchr(b' ', rest).ok_or(GitError::MalformedObject(
                "tree entry missing mode terminator".to_string(),
            ))?;
            let mode = TreeItemMode::from_bytes(&rest[..space])?;
            let nul = memchr::memchr(b'\x00', &rest[space + 1..]).ok_or(
                GitError::MalformedObject("tree entry missing name terminator".to_string()),
            )? + space
                + 1;
            let name = String::from_utf8_lossy(&rest[space + 1..nul]).to_string();
            let hash_end = nul + 1 + ObjectHash::SIZE;
            if rest.len() < hash_end {
                return Err(GitError::MalformedObject(
                    "tree entry truncated before hash".to_string(),
                ));
            }
            let id = ObjectHash::from_bytes(&rest[nul + 1..hash_end])?;
            tree_items.push(TreeItem { mode, id, name });
            rest = &rest[hash_end..];
        }
        Ok(Tree {
            id: hash,
            tree_items,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn get_size(&self) -> usize {
        self.tree_items.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        for item in &self.tree_items {
            data.extend(item.to_data());
        }
        Ok(data)
    }
}
