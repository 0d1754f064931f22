//! Reset: move HEAD (soft), additionally reset the index (mixed), or
//! additionally reset the working tree (hard). Every sub-step is atomic,
//! so no crash-recovery state is kept.

use crate::{
    errors::GitError,
    hash::ObjectHash,
    repo::Repository,
    worktree::CheckoutMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Move HEAD only.
    Soft,
    /// Move HEAD and reset the index to the target tree.
    Mixed,
    /// Move HEAD, index, and working tree.
    Hard,
}

/// Reset the current branch (or detached HEAD) to `target_spec`.
pub fn reset(
    repo: &Repository,
    mode: ResetMode,
    target_spec: &str,
) -> Result<ObjectHash, GitError> {
    let before = repo.state_snapshot();
    let target = repo.rev(target_spec)?;
    let commit = repo.store.peel_to_commit(&target)?;
    let old_head = repo.refs.head_commit()?;

    repo.advance_head(commit.id, old_head)?;

    match mode {
        ResetMode::Soft => {}
        ResetMode::Mixed => {
            let mut index = repo.load_index()?;
            index.read_tree(&repo.store, &commit.tree_id)?;
            repo.save_index(&index)?;
        }
        ResetMode::Hard => {
            let mut index = repo.load_index()?;
            // The old HEAD tree is irrelevant under force; local edits are
            // intentionally discarded.
            repo.worktree().checkout_tree(
                &mut index,
                &commit.tree_id,
                None,
                CheckoutMode::Force,
            )?;
            repo.save_index(&index)?;
        }
    }

    let mode_name = match mode {
        ResetMode::Soft => "--soft",
        ResetMode::Mixed => "--mixed",
        ResetMode::Hard => "--hard",
    };
    tracing::info!(target = %commit.id, mode = mode_name, "reset");
    repo.record(
        "reset",
        vec![mode_name.to_string(), target_spec.to_string()],
        format!("reset {mode_name} {target_spec}"),
        before,
        None,
        Some(commit.id),
    );
    Ok(commit.id)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{ResetMode, reset};
    use crate::repo::Repository;

    fn commit_file(repo: &Repository, path: &str, content: &str, msg: &str) -> crate::hash::ObjectHash {
        fs::write(repo.workdir().join(path), content).unwrap();
        let mut index = repo.load_index().unwrap();
        repo.stage_path(&mut index, path).unwrap();
        repo.save_index(&index).unwrap();
        repo.commit(msg).unwrap()
    }

    fn setup() -> (tempfile::TempDir, Repository, Vec<crate::hash::ObjectHash>) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let c1 = commit_file(&repo, "f.txt", "one\n", "c1");
        let c2 = commit_file(&repo, "f.txt", "two\n", "c2");
        let c3 = commit_file(&repo, "f.txt", "three\n", "c3");
        (dir, repo, vec![c1, c2, c3])
    }

    /// Hard reset moves HEAD, index, and worktree; the uncommitted edit is
    /// gone and status is clean.
    #[test]
    fn hard_reset_unships_a_commit() {
        let (_dir, repo, c) = setup();
        fs::write(repo.workdir().join("f.txt"), "uncommitted edit\n").unwrap();

        let target = reset(&repo, ResetMode::Hard, "HEAD~1").unwrap();
        assert_eq!(target, c[1]);
        assert_eq!(repo.refs.head_commit().unwrap(), Some(c[1]));
        assert_eq!(
            fs::read_to_string(repo.workdir().join("f.txt")).unwrap(),
            "two\n"
        );
        let status = repo.status().unwrap();
        assert!(status.is_clean(), "{status:?}");
    }

    /// Soft reset moves HEAD only: the newer content stays staged.
    #[test]
    fn soft_reset_keeps_index() {
        let (_dir, repo, c) = setup();
        reset(&repo, ResetMode::Soft, "HEAD~1").unwrap();
        assert_eq!(repo.refs.head_commit().unwrap(), Some(c[1]));
        let status = repo.status().unwrap();
        assert_eq!(status.staged.modified, vec!["f.txt".to_string()]);
        assert_eq!(
            fs::read_to_string(repo.workdir().join("f.txt")).unwrap(),
            "three\n"
        );
    }

    /// Mixed reset moves HEAD and index but leaves the worktree alone.
    #[test]
    fn mixed_reset_unstages() {
        let (_dir, repo, c) = setup();
        reset(&repo, ResetMode::Mixed, &c[0].to_string()).unwrap();
        assert_eq!(repo.refs.head_commit().unwrap(), Some(c[0]));
        let status = repo.status().unwrap();
        assert!(status.staged.modified.is_empty());
        // Worktree still has c3's content, so it reads as modified.
        assert_eq!(status.modified, vec!["f.txt".to_string()]);
    }
}
