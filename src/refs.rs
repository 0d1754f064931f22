//! Reference storage: loose ref files under the repository directory with
//! a `packed-refs` fallback for reads, symbolic refs (`ref: <name>`), HEAD
//! attach/detach, and compare-and-swap updates implemented by write-temp
//! plus rename with a re-read before publishing.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{errors::GitError, hash::ObjectHash};

/// Symbolic chains longer than this are rejected (cycle guard).
const MAX_SYMREF_DEPTH: usize = 5;

/// A ref file's content: a direct object id or a pointer to another ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefValue {
    Direct(ObjectHash),
    Symbolic(String),
}

/// Where HEAD points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// Symbolic to a branch; the branch ref may not exist yet (unborn).
    Branch(String),
    /// Direct to a commit.
    Detached(ObjectHash),
}

/// Ref namespace rooted at the repository directory.
pub struct RefStore {
    git_dir: PathBuf,
}

impl RefStore {
    pub fn new(git_dir: impl AsRef<Path>) -> Self {
        Self {
            git_dir: git_dir.as_ref().to_path_buf(),
        }
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.git_dir.join(name)
    }

    /// Parse a ref file body: `ref: <name>` or a 40-hex id. FETCH_HEAD
    /// lines carry trailing annotations after the id, so only the leading
    /// hex is consumed.
    fn parse_ref_content(content: &str) -> Result<RefValue, GitError> {
        let first_line = content.lines().next().unwrap_or("");
        if let Some(target) = first_line.strip_prefix("ref: ") {
            return Ok(RefValue::Symbolic(target.trim().to_string()));
        }
        if first_line.len() >= ObjectHash::HEX_LEN {
            let hash = ObjectHash::from_str(&first_line[..ObjectHash::HEX_LEN])?;
            return Ok(RefValue::Direct(hash));
        }
        Err(GitError::MalformedObject(format!(
            "unparseable ref content: {first_line:?}"
        )))
    }

    /// Read one ref without dereferencing symbolics. Falls back to
    /// `packed-refs` when no loose file exists.
    pub fn read(&self, name: &str) -> Result<Option<RefValue>, GitError> {
        let path = self.path_of(name);
        match fs::read_to_string(&path) {
            Ok(content) => Self::parse_ref_content(&content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(self.read_packed(name)?.map(RefValue::Direct))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look a ref up in `packed-refs`.
    fn read_packed(&self, name: &str) -> Result<Option<ObjectHash>, GitError> {
        Ok(self.packed_refs()?.into_iter().find_map(|(n, h)| {
            if n == name { Some(h) } else { None }
        }))
    }

    /// All `packed-refs` entries. Peeled lines (`^<hash>`) and comments are
    /// skipped.
    pub fn packed_refs(&self) -> Result<Vec<(String, ObjectHash)>, GitError> {
        let path = self.git_dir.join("packed-refs");
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for line in content.lines() {
            if line.starts_with('#') || line.starts_with('^') || line.is_empty() {
                continue;
            }
            if let Some((hash, name)) = line.split_once(' ') {
                if let Ok(hash) = ObjectHash::from_str(hash) {
                    out.push((name.to_string(), hash));
                }
            }
        }
        Ok(out)
    }

    /// Dereference a ref (by full name) through symbolic links to an id.
    pub fn resolve_full(&self, name: &str) -> Result<Option<ObjectHash>, GitError> {
        let mut current = name.to_string();
        for _ in 0..MAX_SYMREF_DEPTH {
            match self.read(&current)? {
                Some(RefValue::Direct(hash)) => return Ok(Some(hash)),
                Some(RefValue::Symbolic(target)) => current = target,
                None => return Ok(None),
            }
        }
        Err(GitError::RefNotFound(format!(
            "symbolic ref chain too deep at {name}"
        )))
    }

    /// Expand a short name using the standard resolution order.
    pub fn full_name(&self, name: &str) -> Result<Option<String>, GitError> {
        if name == "HEAD" || name == "FETCH_HEAD" || name == "MERGE_HEAD" {
            return Ok(self.read(name)?.map(|_| name.to_string()));
        }
        let candidates = [
            name.to_string(),
            format!("refs/heads/{name}"),
            format!("refs/tags/{name}"),
            format!("refs/remotes/{name}/HEAD"),
            format!("refs/remotes/{name}"),
        ];
        for candidate in candidates {
            if !candidate.starts_with("refs/") {
                continue;
            }
            if self.read(&candidate)?.is_some() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Resolve a short or full ref name to an object id.
    pub fn resolve(&self, name: &str) -> Result<Option<ObjectHash>, GitError> {
        match self.full_name(name)? {
            Some(full) => self.resolve_full(&full),
            None => Ok(None),
        }
    }

    /// Resolve, failing with `RefNotFound` when absent or unborn.
    pub fn resolve_existing(&self, name: &str) -> Result<ObjectHash, GitError> {
        self.resolve(name)?
            .ok_or_else(|| GitError::RefNotFound(name.to_string()))
    }

    /// Atomically write a ref file: temp sibling, then rename.
    fn write_ref_file(&self, name: &str, content: &str) -> Result<(), GitError> {
        let path = self.path_of(name);
        let dir = path
            .parent()
            .ok_or_else(|| GitError::RefNotFound(name.to_string()))?;
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        use std::io::Write;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path).map_err(|e| GitError::IOError(e.error))?;
        Ok(())
    }

    /// Unconditional direct-ref update.
    pub fn update(&self, name: &str, new: ObjectHash) -> Result<(), GitError> {
        tracing::debug!(refname = name, new = %new, "updating ref");
        self.write_ref_file(name, &format!("{new}\n"))
    }

    /// Compare-and-swap update: `expected` of `None` requires the ref not
    /// to exist yet. The target is re-read immediately before the rename so
    /// a lost race surfaces as `RefStale`.
    pub fn update_cas(
        &self,
        name: &str,
        new: ObjectHash,
        expected: Option<ObjectHash>,
    ) -> Result<(), GitError> {
        let check = |actual: Option<ObjectHash>| -> Result<(), GitError> {
            if actual != expected {
                return Err(GitError::RefStale {
                    name: name.to_string(),
                    expected: expected.map(|h| h.to_string()).unwrap_or_else(|| "<absent>".into()),
                    actual: actual.map(|h| h.to_string()).unwrap_or_else(|| "<absent>".into()),
                });
            }
            Ok(())
        };
        check(self.resolve_full(name)?)?;
        // Narrow the race window: verify again right before publishing.
        check(self.resolve_full(name)?)?;
        self.update(name, new)
    }

    /// Delete a ref, optionally verifying its current value first. Packed
    /// entries are removed by rewriting `packed-refs` without the line.
    pub fn delete(&self, name: &str, expected: Option<ObjectHash>) -> Result<(), GitError> {
        let actual = self.resolve_full(name)?;
        if actual.is_none() {
            return Err(GitError::RefNotFound(name.to_string()));
        }
        if let Some(expected) = expected {
            if actual != Some(expected) {
                return Err(GitError::RefStale {
                    name: name.to_string(),
                    expected: expected.to_string(),
                    actual: actual.map(|h| h.to_string()).unwrap_or_else(|| "<absent>".into()),
                });
            }
        }
        let path = self.path_of(name);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
        let packed = self.packed_refs()?;
        if packed.iter().any(|(n, _)| n == name) {
            let mut content = String::from("# pack-refs with: peeled fully-peeled sorted \n");
            for (n, h) in packed.into_iter().filter(|(n, _)| n != name) {
                content.push_str(&format!("{h} {n}\n"));
            }
            self.write_ref_file("packed-refs", &content)?;
        }
        Ok(())
    }

    /// List refs under a prefix (e.g. `refs/heads/`), fully resolved,
    /// sorted by name. Loose refs shadow packed ones.
    pub fn list(&self, prefix: &str) -> Result<Vec<(String, ObjectHash)>, GitError> {
        let mut out: Vec<(String, ObjectHash)> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        let root = self.path_of(prefix.trim_end_matches('/'));
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let name = path
                    .strip_prefix(&self.git_dir)
                    .expect("listed path is under the repo dir")
                    .to_string_lossy()
                    .replace('\\', "/");
                if let Some(hash) = self.resolve_full(&name)? {
                    seen.insert(name.clone());
                    out.push((name, hash));
                }
            }
        }

        for (name, hash) in self.packed_refs()? {
            if name.starts_with(prefix) && !seen.contains(&name) {
                out.push((name, hash));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// Read HEAD.
    pub fn head(&self) -> Result<Head, GitError> {
        match self.read("HEAD")? {
            Some(RefValue::Symbolic(target)) => Ok(Head::Branch(target)),
            Some(RefValue::Direct(hash)) => Ok(Head::Detached(hash)),
            None => Err(GitError::RefNotFound("HEAD".to_string())),
        }
    }

    /// Commit id HEAD currently resolves to, `None` on an unborn branch.
    pub fn head_commit(&self) -> Result<Option<ObjectHash>, GitError> {
        match self.head()? {
            Head::Branch(target) => self.resolve_full(&target),
            Head::Detached(hash) => Ok(Some(hash)),
        }
    }

    /// Attach HEAD to a branch ref.
    pub fn set_head_symbolic(&self, target: &str) -> Result<(), GitError> {
        self.write_ref_file("HEAD", &format!("ref: {target}\n"))
    }

    /// Detach HEAD at a commit.
    pub fn set_head_detached(&self, hash: ObjectHash) -> Result<(), GitError> {
        self.write_ref_file("HEAD", &format!("{hash}\n"))
    }

    /// The current branch's short name, `None` when detached.
    pub fn current_branch(&self) -> Result<Option<String>, GitError> {
        match self.head()? {
            Head::Branch(target) => Ok(Some(
                target.strip_prefix("refs/heads/").unwrap_or(&target).to_string(),
            )),
            Head::Detached(_) => Ok(None),
        }
    }
}
