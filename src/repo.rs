//! The repository facade: open/init/discover, and the everyday operations
//! (stage, commit, branch, tag, checkout, status, log) composed from the
//! object store, refs, index, and working tree. One `Repository` value is
//! threaded through the API explicitly; there are no hidden globals.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{
    ancestry::Walk,
    config::Config,
    errors::GitError,
    hash::ObjectHash,
    index::{Index, mode_for},
    internal::object::{
        commit::Commit,
        signature::{Signature, SignatureKind},
        tag::Tag,
        types::ObjectType,
    },
    journal::{Journal, JournalEntry, RepoState},
    odb::ObjectStore,
    refs::{Head, RefStore},
    revision,
    worktree::{CheckoutMode, Status, Worktree},
};

/// Default repository directory name; a different name (e.g. `.tsgit`) may
/// be chosen at init time and is rediscovered by `open`/`discover`.
pub const DEFAULT_DIR_NAME: &str = ".git";

const DEFAULT_BRANCH: &str = "main";

/// Exclusive index lock: `index.lock` created with `O_CREAT|O_EXCL`,
/// removed when the guard drops. Holding it is the mutation discipline for
/// the staging area.
pub struct IndexLock {
    lock_path: PathBuf,
}

impl IndexLock {
    fn acquire(git_dir: &Path) -> Result<IndexLock, GitError> {
        let lock_path = git_dir.join("index.lock");
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => Ok(IndexLock { lock_path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(
                GitError::OperationInProgress("index is locked (index.lock exists)".to_string()),
            ),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// An open repository.
pub struct Repository {
    workdir: PathBuf,
    git_dir: PathBuf,
    pub store: ObjectStore,
    pub refs: RefStore,
    pub config: Config,
    pub journal: Journal,
}

impl Repository {
    /// Initialize a repository at `workdir` with the default dot-dir name.
    pub fn init(workdir: impl AsRef<Path>) -> Result<Repository, GitError> {
        Self::init_with_dir_name(workdir, DEFAULT_DIR_NAME)
    }

    /// Initialize with a custom repository directory name. Re-initializing
    /// an existing repository is a no-op open.
    pub fn init_with_dir_name(
        workdir: impl AsRef<Path>,
        dir_name: &str,
    ) -> Result<Repository, GitError> {
        let workdir = workdir.as_ref().to_path_buf();
        let git_dir = workdir.join(dir_name);
        if git_dir.join("HEAD").is_file() {
            return Self::open_at(workdir, git_dir);
        }

        fs::create_dir_all(git_dir.join("objects/pack"))?;
        fs::create_dir_all(git_dir.join("refs/heads"))?;
        fs::create_dir_all(git_dir.join("refs/tags"))?;
        fs::create_dir_all(git_dir.join("refs/remotes"))?;
        fs::write(
            git_dir.join("HEAD"),
            format!("ref: refs/heads/{DEFAULT_BRANCH}\n"),
        )?;

        let mut config = Config::default();
        config.set("core", None, "repositoryformatversion", "0");
        config.save(&git_dir.join("config"))?;

        tracing::info!(repo = %git_dir.display(), "initialized empty repository");
        Self::open_at(workdir, git_dir)
    }

    /// Open the repository whose dot-dir lives directly under `workdir`.
    pub fn open(workdir: impl AsRef<Path>) -> Result<Repository, GitError> {
        let workdir = workdir.as_ref().to_path_buf();
        match Self::find_dot_dir(&workdir) {
            Some(git_dir) => Self::open_at(workdir, git_dir),
            None => Err(GitError::NotARepository(workdir)),
        }
    }

    /// Walk upward from `start` to the filesystem root looking for a
    /// repository directory.
    pub fn discover(start: impl AsRef<Path>) -> Result<Repository, GitError> {
        let start = start.as_ref().to_path_buf();
        let mut current = Some(start.as_path());
        while let Some(dir) = current {
            if let Some(git_dir) = Self::find_dot_dir(dir) {
                return Self::open_at(dir.to_path_buf(), git_dir);
            }
            current = dir.parent();
        }
        Err(GitError::NotARepository(start))
    }

    /// A repository directory is any immediate dot-directory holding both
    /// a HEAD file and an objects directory (`.git` preferred).
    fn find_dot_dir(workdir: &Path) -> Option<PathBuf> {
        let preferred = workdir.join(DEFAULT_DIR_NAME);
        if preferred.join("HEAD").is_file() {
            return Some(preferred);
        }
        let entries = fs::read_dir(workdir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                continue;
            }
            let candidate = entry.path();
            if candidate.join("HEAD").is_file() && candidate.join("objects").is_dir() {
                return Some(candidate);
            }
        }
        None
    }

    fn open_at(workdir: PathBuf, git_dir: PathBuf) -> Result<Repository, GitError> {
        let store = ObjectStore::open(git_dir.join("objects"))?;
        let refs = RefStore::new(&git_dir);
        let config = Config::load(&git_dir.join("config"))?;
        let version = config.repository_format_version();
        if version != 0 {
            return Err(GitError::InvalidConfig(format!(
                "unsupported repositoryformatversion {version}"
            )));
        }
        let journal = Journal::open(git_dir.join("journal.json"));
        Ok(Repository {
            workdir,
            git_dir,
            store,
            refs,
            config,
            journal,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.git_dir.join("index")
    }

    pub fn load_index(&self) -> Result<Index, GitError> {
        Index::load(&self.index_path())
    }

    /// Save the index under the exclusive lock discipline.
    pub fn save_index(&self, index: &Index) -> Result<(), GitError> {
        let _lock = IndexLock::acquire(&self.git_dir)?;
        index.save(&self.index_path())
    }

    pub fn worktree(&self) -> Worktree<'_> {
        Worktree::new(&self.workdir, &self.git_dir, &self.store)
    }

    // ----- state snapshots & journaling -----

    /// Snapshot of HEAD/branch/index for journal entries.
    pub fn state_snapshot(&self) -> RepoState {
        let head = self
            .refs
            .head_commit()
            .ok()
            .flatten()
            .map(|h| h.to_string());
        let branch = self.refs.current_branch().ok().flatten();
        let index_hash = fs::read(self.index_path())
            .ok()
            .map(|bytes| ObjectHash::new(&bytes).to_string());
        RepoState {
            head,
            branch,
            index_hash,
        }
    }

    /// Append a journal entry for an operation that just became durable.
    pub fn record(
        &self,
        operation: &str,
        args: Vec<String>,
        description: String,
        before: RepoState,
        affected_files: Option<Vec<String>>,
        commit: Option<ObjectHash>,
    ) {
        let mut entry: JournalEntry =
            Journal::entry(operation, args, description, before, self.state_snapshot());
        entry.affected_files = affected_files;
        entry.commit = commit;
        if let Err(e) = self.journal.append(entry) {
            // The operation itself is durable; a failed journal write only
            // costs undo information.
            tracing::warn!(error = %e, "journal append failed");
        }
    }

    // ----- resumable-operation bookkeeping -----

    pub fn merge_head_path(&self) -> PathBuf {
        self.git_dir.join("MERGE_HEAD")
    }

    pub fn merge_msg_path(&self) -> PathBuf {
        self.git_dir.join("MERGE_MSG")
    }

    pub fn rebase_dir(&self) -> PathBuf {
        self.git_dir.join("rebase-merge")
    }

    pub fn bisect_dir(&self) -> PathBuf {
        self.git_dir.join("bisect")
    }

    /// Which resumable operation is active, if any.
    pub fn operation_in_progress(&self) -> Option<&'static str> {
        if self.rebase_dir().is_dir() {
            Some("rebase")
        } else if self.bisect_dir().is_dir() {
            Some("bisect")
        } else if self.merge_head_path().is_file() {
            Some("merge")
        } else {
            None
        }
    }

    /// Fail unless no rebase/bisect/merge is active.
    pub fn ensure_no_operation(&self) -> Result<(), GitError> {
        match self.operation_in_progress() {
            Some(kind) => Err(GitError::OperationInProgress(kind.to_string())),
            None => Ok(()),
        }
    }

    // ----- HEAD helpers -----

    /// The commit HEAD resolves to; `None` on an unborn branch.
    pub fn head_commit(&self) -> Result<Option<Commit>, GitError> {
        match self.refs.head_commit()? {
            Some(hash) => Ok(Some(self.store.peel_to_commit(&hash)?)),
            None => Ok(None),
        }
    }

    /// The tree of the HEAD commit.
    pub fn head_tree(&self) -> Result<Option<ObjectHash>, GitError> {
        Ok(self.head_commit()?.map(|c| c.tree_id))
    }

    /// Resolve a revision expression in this repository.
    pub fn rev(&self, spec: &str) -> Result<ObjectHash, GitError> {
        revision::resolve(&self.refs, &self.store, spec)
    }

    // ----- identity -----

    /// Resolve an identity line: environment overrides, then config, then
    /// a neutral fallback.
    pub fn signature(&self, kind: SignatureKind) -> Signature {
        let (name_var, email_var) = match kind {
            SignatureKind::Committer => ("GIT_COMMITTER_NAME", "GIT_COMMITTER_EMAIL"),
            _ => ("GIT_AUTHOR_NAME", "GIT_AUTHOR_EMAIL"),
        };
        let name = std::env::var(name_var)
            .ok()
            .or_else(|| self.config.user_name().map(|s| s.to_string()))
            .unwrap_or_else(|| "rsgit".to_string());
        let email = std::env::var(email_var)
            .ok()
            .or_else(|| self.config.user_email().map(|s| s.to_string()))
            .unwrap_or_else(|| "rsgit@localhost".to_string());
        Signature::new(kind, name, email)
    }

    // ----- staging -----

    /// Hash a working file into the store and stage it.
    pub fn stage_path(&self, index: &mut Index, path: &str) -> Result<(), GitError> {
        let file = self.workdir.join(path);
        let meta = fs::symlink_metadata(&file)?;
        let mode = mode_for(&meta);
        let content = if mode == 0o120000 {
            fs::read_link(&file)?.to_string_lossy().as_bytes().to_vec()
        } else {
            fs::read(&file)?
        };
        let hash = self.store.write(ObjectType::Blob, &content)?;
        index.add(path, mode, hash, &meta);
        Ok(())
    }

    /// Stage every change the worktree shows: new files, modified files,
    /// and deletions.
    pub fn stage_all(&self, index: &mut Index) -> Result<Vec<String>, GitError> {
        let status = self.worktree().status(index, self.head_tree()?.as_ref())?;
        let mut touched = Vec::new();
        for path in status.untracked.iter().chain(&status.modified) {
            self.stage_path(index, path)?;
            touched.push(path.clone());
        }
        for path in &status.deleted {
            index.remove(path);
            touched.push(path.clone());
        }
        Ok(touched)
    }

    // ----- commit -----

    /// Create a commit from the index. Parents are HEAD plus MERGE_HEAD
    /// when a merge is being concluded. Fails with `NothingToCommit` when
    /// the index tree equals HEAD's tree (and no merge is pending).
    pub fn commit(&self, message: &str) -> Result<ObjectHash, GitError> {
        let before = self.state_snapshot();
        let index = self.load_index()?;
        if index.has_conflicts() {
            return Err(GitError::MergeConflict(index.conflict_paths()));
        }

        let head = self.head_commit()?;
        let tree_id = index.build_tree(&self.store)?;

        let merge_head = self.read_merge_head()?;
        if merge_head.is_none() {
            match &head {
                Some(head) if head.tree_id == tree_id => {
                    return Err(GitError::NothingToCommit);
                }
                None if index.is_empty() => return Err(GitError::NothingToCommit),
                _ => {}
            }
        }

        let mut parents = Vec::new();
        if let Some(head) = &head {
            parents.push(head.id);
        }
        if let Some(merge_head) = merge_head {
            parents.push(merge_head);
        }

        let commit = Commit::new(
            self.signature(SignatureKind::Author),
            self.signature(SignatureKind::Committer),
            tree_id,
            parents,
            &normalize_message(message),
        );
        self.store.write_obj(&commit)?;
        self.advance_head(commit.id, head.map(|c| c.id))?;

        // Concluding a merge clears its pending markers.
        let _ = fs::remove_file(self.merge_head_path());
        let _ = fs::remove_file(self.merge_msg_path());

        tracing::info!(commit = %commit.id, "created commit");
        self.record(
            "commit",
            vec![message.to_string()],
            format!("commit: {}", commit.format_message()),
            before,
            None,
            Some(commit.id),
        );
        Ok(commit.id)
    }

    fn read_merge_head(&self) -> Result<Option<ObjectHash>, GitError> {
        match fs::read_to_string(self.merge_head_path()) {
            Ok(content) => {
                let line = content.lines().next().unwrap_or("").trim();
                Ok(Some(line.parse()?))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Move HEAD (branch tip or detached) to `new`, CAS-checked against
    /// the previously observed value.
    pub fn advance_head(
        &self,
        new: ObjectHash,
        expected_old: Option<ObjectHash>,
    ) -> Result<(), GitError> {
        match self.refs.head()? {
            Head::Branch(branch_ref) => self.refs.update_cas(&branch_ref, new, expected_old),
            Head::Detached(_) => self.refs.set_head_detached(new),
        }
    }

    // ----- branches, tags -----

    pub fn create_branch(&self, name: &str, at: Option<&str>) -> Result<ObjectHash, GitError> {
        let target = match at {
            Some(spec) => self.rev(spec)?,
            None => self
                .refs
                .head_commit()?
                .ok_or(GitError::NoCommitsYet)?,
        };
        self.refs
            .update_cas(&format!("refs/heads/{name}"), target, None)?;
        Ok(target)
    }

    pub fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        if self.refs.current_branch()?.as_deref() == Some(name) {
            return Err(GitError::InvalidRevision(format!(
                "cannot delete the checked-out branch {name}"
            )));
        }
        self.refs.delete(&format!("refs/heads/{name}"), None)
    }

    /// Branches as `(short name, tip, is_current)`.
    pub fn branches(&self) -> Result<Vec<(String, ObjectHash, bool)>, GitError> {
        let current = self.refs.current_branch()?;
        Ok(self
            .refs
            .list("refs/heads/")?
            .into_iter()
            .map(|(name, hash)| {
                let short = name.trim_start_matches("refs/heads/").to_string();
                let is_current = current.as_deref() == Some(short.as_str());
                (short, hash, is_current)
            })
            .collect())
    }

    /// Lightweight tag: just a ref.
    pub fn tag_lightweight(&self, name: &str, at: Option<&str>) -> Result<ObjectHash, GitError> {
        let target = match at {
            Some(spec) => self.rev(spec)?,
            None => self.refs.head_commit()?.ok_or(GitError::NoCommitsYet)?,
        };
        self.refs
            .update_cas(&format!("refs/tags/{name}"), target, None)?;
        Ok(target)
    }

    /// Annotated tag: a tag object plus the ref.
    pub fn tag_annotated(
        &self,
        name: &str,
        message: &str,
        at: Option<&str>,
    ) -> Result<ObjectHash, GitError> {
        let target = match at {
            Some(spec) => self.rev(spec)?,
            None => self.refs.head_commit()?.ok_or(GitError::NoCommitsYet)?,
        };
        let tag = Tag::new(
            target,
            ObjectType::Commit,
            name.to_string(),
            self.signature(SignatureKind::Tagger),
            &normalize_message(message),
        );
        self.store.write_obj(&tag)?;
        self.refs.update_cas(&format!("refs/tags/{name}"), tag.id, None)?;
        Ok(tag.id)
    }

    // ----- checkout -----

    /// Switch to a branch: safe-checkout its tree, then move HEAD.
    pub fn checkout_branch(&self, name: &str) -> Result<(), GitError> {
        self.ensure_no_operation()?;
        let before = self.state_snapshot();
        let target = self
            .refs
            .resolve(&format!("refs/heads/{name}"))?
            .ok_or_else(|| GitError::RefNotFound(name.to_string()))?;
        let target_tree = self.store.peel_to_commit(&target)?.tree_id;
        let head_tree = self.head_tree()?;

        let mut index = self.load_index()?;
        self.worktree().checkout_tree(
            &mut index,
            &target_tree,
            head_tree.as_ref(),
            CheckoutMode::Safe,
        )?;
        self.save_index(&index)?;
        self.refs.set_head_symbolic(&format!("refs/heads/{name}"))?;
        self.record(
            "checkout",
            vec![name.to_string()],
            format!("checkout branch {name}"),
            before,
            None,
            Some(target),
        );
        Ok(())
    }

    /// Detach HEAD at a revision and check out its tree.
    pub fn checkout_detached(&self, spec: &str, mode: CheckoutMode) -> Result<(), GitError> {
        let target = self.rev(spec)?;
        let commit = self.store.peel_to_commit(&target)?;
        let head_tree = self.head_tree()?;
        let mut index = self.load_index()?;
        self.worktree()
            .checkout_tree(&mut index, &commit.tree_id, head_tree.as_ref(), mode)?;
        self.save_index(&index)?;
        self.refs.set_head_detached(commit.id)?;
        Ok(())
    }

    // ----- queries -----

    pub fn status(&self) -> Result<Status, GitError> {
        let mut index = self.load_index()?;
        let head_tree = self.head_tree()?;
        let status = self.worktree().status(&mut index, head_tree.as_ref())?;
        // Persist refreshed stat caches opportunistically.
        let _ = self.save_index(&index);
        Ok(status)
    }

    /// Undo the most recent journaled operation by restoring its recorded
    /// before-state: the branch tip (or detached HEAD) moves back and the
    /// index and worktree follow. Worktree-only edits made since are lost.
    pub fn undo_last(&self) -> Result<(), GitError> {
        self.ensure_no_operation()?;
        let entry = self
            .journal
            .latest()?
            .ok_or_else(|| GitError::CustomError("journal is empty".to_string()))?;
        let target: ObjectHash = entry
            .before
            .head
            .as_deref()
            .ok_or_else(|| {
                GitError::CustomError(format!(
                    "cannot undo {}: no prior commit recorded",
                    entry.operation
                ))
            })?
            .parse()?;
        let before = self.state_snapshot();

        match &entry.before.branch {
            Some(branch) => {
                let branch_ref = format!("refs/heads/{branch}");
                self.refs.update(&branch_ref, target)?;
                self.refs.set_head_symbolic(&branch_ref)?;
            }
            None => self.refs.set_head_detached(target)?,
        }
        let tree = self.store.peel_to_commit(&target)?.tree_id;
        let mut index = self.load_index()?;
        self.worktree()
            .checkout_tree(&mut index, &tree, None, CheckoutMode::Force)?;
        self.save_index(&index)?;

        self.record(
            "undo",
            vec![entry.operation.clone()],
            format!("undo {}", entry.description),
            before,
            None,
            Some(target),
        );
        Ok(())
    }

    /// First-parent history from HEAD, newest first.
    pub fn log(&self, limit: Option<usize>) -> Result<Vec<Commit>, GitError> {
        let head = match self.refs.head_commit()? {
            Some(h) => h,
            None => return Ok(vec![]),
        };
        let mut walk = Walk::new(&self.store, head)?;
        if let Some(n) = limit {
            walk = walk.limit(n);
        }
        walk.collect()
    }
}

/// Commit/tag messages are stored with a separating blank line before the
/// body and a trailing newline, the way the serializer expects them.
fn normalize_message(message: &str) -> String {
    let trimmed = message.trim_end_matches('\n');
    format!("\n{trimmed}\n")
}
