//! Append-only operation log (`journal.json`): one entry per mutating
//! repository operation, recording the before/after state so callers can
//! implement undo. Entries are appended only after the operation's on-disk
//! effect is durable; the log is capped with FIFO eviction.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{errors::GitError, hash::ObjectHash};

/// Default number of entries kept before FIFO eviction.
pub const DEFAULT_JOURNAL_CAP: usize = 100;

/// Repository state snapshot stored on both sides of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoState {
    /// Commit id HEAD resolved to, if any.
    pub head: Option<String>,
    /// Current branch short name, `None` when detached.
    pub branch: Option<String>,
    /// Digest of the index file, if one exists.
    pub index_hash: Option<String>,
}

/// One logged operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub args: Vec<String>,
    pub description: String,
    pub before: RepoState,
    pub after: RepoState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<ObjectHash>,
}

/// The journal file handle.
pub struct Journal {
    path: PathBuf,
    cap: usize,
}

impl Journal {
    pub fn open(path: impl AsRef<Path>) -> Journal {
        Journal {
            path: path.as_ref().to_path_buf(),
            cap: DEFAULT_JOURNAL_CAP,
        }
    }

    pub fn with_cap(path: impl AsRef<Path>, cap: usize) -> Journal {
        Journal {
            path: path.as_ref().to_path_buf(),
            cap,
        }
    }

    /// All entries, oldest first. A missing file is an empty log.
    pub fn entries(&self) -> Result<Vec<JournalEntry>, GitError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map_err(|e| GitError::MalformedObject(format!("journal: {e}")))
    }

    /// The most recent entry.
    pub fn latest(&self) -> Result<Option<JournalEntry>, GitError> {
        Ok(self.entries()?.into_iter().last())
    }

    /// Append an entry, evicting from the front past the cap.
    pub fn append(&self, entry: JournalEntry) -> Result<(), GitError> {
        let mut entries = self.entries()?;
        entries.push(entry);
        while entries.len() > self.cap {
            entries.remove(0);
        }
        let body = serde_json::to_string_pretty(&entries)
            .map_err(|e| GitError::MalformedObject(format!("journal: {e}")))?;
        let dir = self
            .path
            .parent()
            .ok_or_else(|| GitError::MalformedObject("journal path has no parent".to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        use std::io::Write;
        tmp.write_all(body.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| GitError::IOError(e.error))?;
        Ok(())
    }

    /// Build an entry with a fresh id and timestamp.
    pub fn entry(
        operation: &str,
        args: Vec<String>,
        description: String,
        before: RepoState,
        after: RepoState,
    ) -> JournalEntry {
        JournalEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation: operation.to_string(),
            args,
            description,
            before,
            after,
            affected_files: None,
            commit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Journal, RepoState};

    fn state(head: Option<&str>) -> RepoState {
        RepoState {
            head: head.map(|s| s.to_string()),
            branch: Some("main".to_string()),
            index_hash: None,
        }
    }

    /// Appended entries read back in order with their fields intact.
    #[test]
    fn append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path().join("journal.json"));
        assert!(journal.entries().unwrap().is_empty());

        journal
            .append(Journal::entry(
                "commit",
                vec!["-m".into(), "init".into()],
                "commit: init".into(),
                state(None),
                state(Some("aaaa")),
            ))
            .unwrap();
        journal
            .append(Journal::entry(
                "reset",
                vec!["--hard".into()],
                "reset --hard".into(),
                state(Some("aaaa")),
                state(None),
            ))
            .unwrap();

        let entries = journal.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, "commit");
        assert_eq!(entries[1].operation, "reset");
        assert_eq!(journal.latest().unwrap().unwrap().operation, "reset");
        assert_ne!(entries[0].id, entries[1].id);
    }

    /// The cap evicts oldest-first.
    #[test]
    fn fifo_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::with_cap(dir.path().join("journal.json"), 3);
        for i in 0..5 {
            journal
                .append(Journal::entry(
                    "op",
                    vec![i.to_string()],
                    format!("op {i}"),
                    state(None),
                    state(None),
                ))
                .unwrap();
        }
        let entries = journal.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].args, vec!["2".to_string()]);
        assert_eq!(entries[2].args, vec!["4".to_string()]);
    }
}
