//! Working-tree synchronization: checkout with a would-lose-changes guard,
//! status against the index and HEAD, path restore, and empty-directory
//! cleanup after deletions.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    index::{Index, TreeDiff, hash_workfile},
    internal::object::tree::TreeItemMode,
    odb::{ObjectStore, flatten_tree},
};

/// Safe checkout refuses to overwrite local edits; force skips the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    Safe,
    Force,
}

/// The four status buckets.
#[derive(Debug, Default, Clone)]
pub struct Status {
    /// Index vs HEAD tree.
    pub staged: TreeDiff,
    /// Worktree differs from index (content), deletions excluded.
    pub modified: Vec<String>,
    /// In the index but missing from the worktree.
    pub deleted: Vec<String>,
    /// In the worktree, absent from the index, not ignored.
    pub untracked: Vec<String>,
}

impl Status {
    pub fn is_clean(&self) -> bool {
        self.staged.added.is_empty()
            && self.staged.modified.is_empty()
            && self.staged.deleted.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.untracked.is_empty()
    }
}

/// Working tree bound to a repository's object store.
pub struct Worktree<'a> {
    pub workdir: &'a Path,
    pub git_dir: &'a Path,
    pub store: &'a ObjectStore,
}

impl<'a> Worktree<'a> {
    pub fn new(workdir: &'a Path, git_dir: &'a Path, store: &'a ObjectStore) -> Worktree<'a> {
        Worktree {
            workdir,
            git_dir,
            store,
        }
    }

    /// Built-in ignore blacklist: the repository dot-directory, `.git`,
    /// and `node_modules`.
    fn ignored(&self, name: &str) -> bool {
        if name == ".git" || name == "node_modules" {
            return true;
        }
        self.git_dir
            .file_name()
            .map(|d| d.to_string_lossy() == name)
            .unwrap_or(false)
    }

    /// Check out `target_tree` into the worktree and index.
    ///
    /// Safe mode refuses to touch any path whose on-disk content differs
    /// from both the current HEAD tree and the target tree. After files are
    /// written, directories left empty are removed.
    pub fn checkout_tree(
        &self,
        index: &mut Index,
        target_tree: &ObjectHash,
        head_tree: Option<&ObjectHash>,
        mode: CheckoutMode,
    ) -> Result<(), GitError> {
        let target = flatten_tree(self.store, target_tree)?;
        let head = match head_tree {
            Some(t) => flatten_tree(self.store, t)?,
            None => BTreeMap::new(),
        };

        if mode == CheckoutMode::Safe {
            self.guard_local_changes(&target, &head)?;
        }

        // Delete tracked paths that vanish in the target.
        let current: Vec<String> = index.flat().keys().cloned().collect();
        for path in &current {
            if !target.contains_key(path) {
                let file = self.workdir.join(path);
                match fs::remove_file(&file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                index.remove(path);
            }
        }

        // Write target content and refresh index entries. Paths the
        // transition does not touch keep their working copy (a local edit
        // to a file identical in both trees survives a safe checkout).
        for (path, (item_mode, hash)) in &target {
            let untouched = mode == CheckoutMode::Safe
                && head.get(path) == Some(&(*item_mode, *hash))
                && self.workdir.join(path).exists();
            if untouched {
                if index.entry(path, 0).is_none() {
                    index.add_entry(crate::index::IndexEntry::bare(
                        path.clone(),
                        item_mode.to_index_mode(),
                        *hash,
                    ));
                }
                continue;
            }
            self.write_workfile(path, *item_mode, hash)?;
            let meta = fs::symlink_metadata(self.workdir.join(path)).map_err(|e| {
                eprintln!("DEBUG symlink_metadata({:?}) -> {:?}", self.workdir.join(path), e);
                e
            })?;
            index.remove(path);
            index.add(path, item_mode.to_index_mode(), *hash, &meta);
        }

        self.clean_empty_dirs()?;
        Ok(())
    }

    /// The would-lose-changes guard: any on-disk file whose content hash
    /// matches neither the HEAD version nor the target version blocks a
    /// safe checkout.
    fn guard_local_changes(
        &self,
        target: &BTreeMap<String, (TreeItemMode, ObjectHash)>,
        head: &BTreeMap<String, (TreeItemMode, ObjectHash)>,
    ) -> Result<(), GitError> {
        let mut dirty = Vec::new();
        let mut paths: Vec<&String> = target.keys().collect();
        paths.extend(head.keys());
        paths.sort();
        paths.dedup();

        for path in paths {
            let head_entry = head.get(path);
            let target_entry = target.get(path);
            if head_entry == target_entry {
                continue; // checkout will not touch it
            }
            let file = self.workdir.join(path);
            let meta = match fs::symlink_metadata(&file) {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !meta.is_file() && !meta.file_type().is_symlink() {
                continue;
            }
            let item_mode = head_entry
                .or(target_entry)
                .map(|(m, _)| m.to_index_mode())
                .unwrap_or(0o100644);
            let actual = hash_workfile(&file, item_mode)?;
            let matches_head = head_entry.map(|(_, h)| *h == actual).unwrap_or(false);
            let matches_target = target_entry.map(|(_, h)| *h == actual).unwrap_or(false);
            if !matches_head && !matches_target {
                dirty.push(path.to_string());
            }
        }
        if !dirty.is_empty() {
            return Err(GitError::UncommittedChanges(dirty.join(", ")));
        }
        Ok(())
    }

    /// Write one blob into the worktree at `path`, honoring the executable
    /// bit and symlink mode on POSIX.
    fn write_workfile(
        &self,
        path: &str,
        mode: TreeItemMode,
        hash: &ObjectHash,
    ) -> Result<(), GitError> {
        let file = self.workdir.join(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                eprintln!("DEBUG create_dir_all({:?}) -> {:?}", parent, e);
                e
            })?;
        }
        let blob = self.store.read_blob(hash)?;
        eprintln!("DEBUG write_workfile path={:?} file={:?}", path, file);

        if mode == TreeItemMode::Link {
            let target = String::from_utf8_lossy(&blob.data).to_string();
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &file)?;
            #[cfg(not(unix))]
            fs::write(&file, target.as_bytes())?;
            return Ok(());
        }

        fs::write(&file, &blob.data).map_err(|e| {
            eprintln!("DEBUG fs::write({:?}) -> {:?}", file, e);
            e
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode_bits = if mode == TreeItemMode::BlobExecutable {
                0o755
            } else {
                0o644
            };
            fs::set_permissions(&file, fs::Permissions::from_mode(mode_bits))?;
        }
        Ok(())
    }

    /// Compute the four status buckets. `diff_workdir` refreshes stale
    /// stat caches as a side effect, so callers should save the index
    /// afterwards when convenient.
    pub fn status(
        &self,
        index: &mut Index,
        head_tree: Option<&ObjectHash>,
    ) -> Result<Status, GitError> {
        let staged = index.diff_tree(self.store, head_tree)?;
        let workdir = index.diff_workdir(self.workdir)?;

        let mut untracked = Vec::new();
        let tracked = index.flat();
        self.scan_untracked(self.workdir, &tracked, &mut untracked)?;
        untracked.sort();

        Ok(Status {
            staged,
            modified: workdir.modified,
            deleted: workdir.deleted,
            untracked,
        })
    }

    fn scan_untracked(
        &self,
        dir: &Path,
        tracked: &BTreeMap<String, (u32, ObjectHash)>,
        out: &mut Vec<String>,
    ) -> Result<(), GitError> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if self.ignored(&name) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                self.scan_untracked(&path, tracked, out)?;
            } else {
                let rel = path
                    .strip_prefix(self.workdir)
                    .expect("scanned path is under workdir")
                    .to_string_lossy()
                    .replace('\\', "/");
                if !tracked.contains_key(&rel) {
                    out.push(rel);
                }
            }
        }
        Ok(())
    }

    /// Restore the given worktree paths to their content in `source_tree`.
    /// Index entries whose hash already matches get their stat refreshed so
    /// the restored file reads as clean.
    pub fn restore(
        &self,
        index: &mut Index,
        paths: &[String],
        source_tree: &ObjectHash,
    ) -> Result<(), GitError> {
        let source = flatten_tree(self.store, source_tree)?;
        for path in paths {
            let (mode, hash) = source
                .get(path)
                .ok_or_else(|| GitError::ObjectNotFound(format!("{path} in source tree")))?;
            self.write_workfile(path, *mode, hash)?;
            if let Some(entry) = index.entry(path, 0) {
                if entry.hash == *hash {
                    let meta = fs::symlink_metadata(self.workdir.join(path))?;
                    let mut refreshed = entry.clone();
                    refreshed.refresh_stat(&meta);
                    index.add_entry(refreshed);
                }
            }
        }
        Ok(())
    }

    /// Remove directories left empty after deletions, stopping at the
    /// worktree root and never entering the repository dot-directory.
    pub fn clean_empty_dirs(&self) -> Result<(), GitError> {
        fn sweep(dir: &Path, protect: &Path) -> Result<bool, GitError> {
            let mut empty = true;
            let entries = match fs::read_dir(dir) {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path == protect {
                    empty = false;
                    continue;
                }
                if path.is_dir() {
                    if sweep(&path, protect)? {
                        fs::remove_dir(&path)?;
                    } else {
                        empty = false;
                    }
                } else {
                    empty = false;
                }
            }
            Ok(empty)
        }
        sweep(self.workdir, self.git_dir)?;
        Ok(())
    }

    /// Absolute path of a tracked file.
    pub fn file_path(&self, rel: &str) -> PathBuf {
        self.workdir.join(rel)
    }
}
