//! The Commit object records one version of the project: the id of the top
//! level tree, the ordered parent commits, author and committer identity
//! lines, and the message. Chaining commits through their parent ids is
//! what gives the repository its history DAG.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{
        ObjectTrait,
        signature::Signature,
        types::ObjectType,
    },
};

/// A commit: tree id, parent ids (0 for a root commit, 1 for linear
/// history, 2+ for merges), author, committer, message. The message keeps
/// its trailing newline; the serialized form is
/// `tree <h>\n(parent <h>\n)*author ...\ncommitter ...\n\n<message>`.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: ObjectHash,
    pub tree_id: ObjectHash,
    pub parent_commit_ids: Vec<ObjectHash>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree: {}", self.tree_id)?;
        for parent in self.parent_commit_ids.iter() {
            writeln!(f, "parent: {parent}")?;
        }
        writeln!(f, "{}", self.author)?;
        writeln!(f, "{}", self.committer)?;
        writeln!(f)?;
        writeln!(f, "{}", self.message)
    }
}

impl Commit {
    /// Build a commit and compute its id from the serialized form. Two
    /// commits built from identical inputs hash identically.
    pub fn new(
        author: Signature,
        committer: Signature,
        tree_id: ObjectHash,
        parent_commit_ids: Vec<ObjectHash>,
        message: &str,
    ) -> Commit {
        let mut commit = Commit {
            id: ObjectHash::default(),
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message: message.to_string(),
        };
        let data = commit.to_data().expect("commit serialization is infallible");
        commit.id = ObjectHash::from_type_and_data(ObjectType::Commit, &data);
        commit
    }

    /// First parent, if any. History walks default to following this.
    pub fn first_parent(&self) -> Option<ObjectHash> {
        self.parent_commit_ids.first().copied()
    }

    /// The commit subject: the first non-blank message line, with any
    /// embedded PGP signature block skipped over.
    pub fn format_message(&self) -> String {
        let mut in_signature = false;
        for line in self.message.lines() {
            if line.contains("-----BEGIN PGP SIGNATURE-----") {
                in_signature = true;
            }
            if in_signature {
                in_signature = !line.contains("-----END PGP SIGNATURE-----");
                continue;
            }
            let line = line.trim();
            if !line.is_empty() {
                return line.to_string();
            }
        }
        String::new()
    }
}

impl ObjectTrait for Commit {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        let invalid = |what: &str| GitError::MalformedObject(format!("commit: {what}"));

        let mut rest = data;
        // "tree <40 hex>\n"
        if !rest.starts_with(b"tree ") {
            return Err(invalid("missing tree header"));
        }
        let line_end = rest.find_byte(b'\n').ok_or_else(|| invalid("truncated"))?;
        let tree_id = ObjectHash::from_str(
            std::str::from_utf8(&rest[5..line_end]).map_err(|_| invalid("tree id"))?,
        )?;
        rest = &rest[line_end + 1..];

        // zero or more "parent <40 hex>\n"
        let mut parent_commit_ids = Vec::new();
        while rest.starts_with(b"parent ") {
            let line_end = rest.find_byte(b'\n').ok_or_else(|| invalid("truncated"))?;
            parent_commit_ids.push(ObjectHash::from_str(
                std::str::from_utf8(&rest[7..line_end]).map_err(|_| invalid("parent id"))?,
            )?);
            rest = &rest[line_end + 1..];
        }

        let line_end = rest.find_byte(b'\n').ok_or_else(|| invalid("truncated"))?;
        let author = Signature::from_data(rest[..line_end].to_vec())?;
        rest = &rest[line_end + 1..];

        let line_end = rest.find_byte(b'\n').ok_or_else(|| invalid("truncated"))?;
        let committer = Signature::from_data(rest[..line_end].to_vec())?;
        rest = &rest[line_end + 1..];

        // Everything after the committer line belongs to the message. Extra
        // headers (gpgsig, encoding) are carried verbatim so re-encoding a
        // foreign commit reproduces its bytes and id.
        let message = String::from_utf8_lossy(rest).to_string();

        Ok(Commit {
            id: hash,
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn get_size(&self) -> usize {
        0
    }

    /// [Git-Internals-Git-Objects](https://git-scm.com/book/en/v2/Git-Internals-Git-Objects)
    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();

        data.extend(b"tree ");
        data.extend(self.tree_id.to_string().as_bytes());
        data.push(0x0a);

        for parent in &self.parent_commit_ids {
            data.extend(b"parent ");
            data.extend(parent.to_string().as_bytes());
            data.push(0x0a);
        }

        data.extend(self.author.to_data()?);
        data.push(0x0a);
        data.extend(self.committer.to_data()?);
        data.push(0x0a);
        data.extend(self.message.as_bytes());

        Ok(data)
    }
}
