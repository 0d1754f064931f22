//! Rebase: replay the current branch's commits onto another base. The
//! step list, cursor, and original position live in
//! `rebase-merge/state.json`; the directory's presence marks the rebase as
//! in progress, and a conflicted step suspends with the cursor parked on
//! it until `resolve_and_continue`, `skip`, or `abort`.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::{
    ancestry,
    errors::GitError,
    hash::ObjectHash,
    internal::object::{commit::Commit, signature::SignatureKind},
    merge::merge_trees_into_worktree,
    repo::Repository,
    worktree::CheckoutMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebaseAction {
    Pick,
    Reword,
    Edit,
    Squash,
    Fixup,
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebaseStep {
    pub action: RebaseAction,
    pub commit: ObjectHash,
    /// Replacement message for `reword`/`squash`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The crash-safe state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebaseState {
    pub onto: ObjectHash,
    pub upstream: String,
    pub original_branch: Option<String>,
    pub original_head: ObjectHash,
    pub steps: Vec<RebaseStep>,
    pub cursor: usize,
    pub interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseProgress {
    /// All steps applied; HEAD (and the original branch) point at the new
    /// tip.
    Complete(ObjectHash),
    /// A step conflicted; resolve, stage, then `resolve_and_continue`.
    Conflicted {
        commit: ObjectHash,
        paths: Vec<String>,
    },
    /// An `edit` step applied and paused for amending.
    Stopped(ObjectHash),
}

fn state_path(repo: &Repository) -> std::path::PathBuf {
    repo.rebase_dir().join("state.json")
}

fn save_state(repo: &Repository, state: &RebaseState) -> Result<(), GitError> {
    fs::create_dir_all(repo.rebase_dir())?;
    let body = serde_json::to_string_pretty(state)
        .map_err(|e| GitError::CustomError(format!("rebase state: {e}")))?;
    fs::write(state_path(repo), body)?;
    Ok(())
}

fn load_state(repo: &Repository) -> Result<RebaseState, GitError> {
    let content = match fs::read_to_string(state_path(repo)) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GitError::CustomError("no rebase in progress".to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content)
        .map_err(|e| GitError::CustomError(format!("rebase state: {e}")))
}

/// Current rebase state, if one is in progress.
pub fn status(repo: &Repository) -> Result<Option<RebaseState>, GitError> {
    if repo.rebase_dir().is_dir() {
        load_state(repo).map(Some)
    } else {
        Ok(None)
    }
}

/// Start a non-interactive rebase of HEAD onto `upstream_spec`: every
/// replayed commit is a `pick`.
pub fn start(repo: &Repository, upstream_spec: &str) -> Result<RebaseProgress, GitError> {
    start_with_plan(repo, upstream_spec, false, |steps| steps)
}

/// Start an interactive rebase; `plan` receives the pick list (oldest
/// first) and returns the edited step list.
pub fn start_interactive(
    repo: &Repository,
    upstream_spec: &str,
    plan: impl FnOnce(Vec<RebaseStep>) -> Vec<RebaseStep>,
) -> Result<RebaseProgress, GitError> {
    start_with_plan(repo, upstream_spec, true, plan)
}

fn start_with_plan(
    repo: &Repository,
    upstream_spec: &str,
    interactive: bool,
    plan: impl FnOnce(Vec<RebaseStep>) -> Vec<RebaseStep>,
) -> Result<RebaseProgress, GitError> {
    repo.ensure_no_operation()?;
    let before = repo.state_snapshot();

    let head = repo.head_commit()?.ok_or(GitError::NoCommitsYet)?;
    let original_branch = repo.refs.current_branch()?;
    let onto_id = repo.rev(upstream_spec)?;
    let onto = repo.store.peel_to_commit(&onto_id)?;

    let base = ancestry::merge_base(&repo.store, head.id, onto.id)?
        .ok_or_else(|| GitError::CustomError("no common ancestor with upstream".to_string()))?;

    if base == onto.id {
        // Upstream is already behind (or at) our base: nothing to replay.
        return Ok(RebaseProgress::Complete(head.id));
    }

    // Commits to replay: first-parent chain head..base, oldest first.
    let mut to_replay = Vec::new();
    let mut cursor = head.clone();
    while cursor.id != base {
        to_replay.push(cursor.id);
        cursor = match cursor.first_parent() {
            Some(parent) => repo.store.peel_to_commit(&parent)?,
            None => break,
        };
    }
    to_replay.reverse();

    let steps = plan(
        to_replay
            .into_iter()
            .map(|commit| RebaseStep {
                action: RebaseAction::Pick,
                commit,
                message: None,
            })
            .collect(),
    );

    let state = RebaseState {
        onto: onto.id,
        upstream: upstream_spec.to_string(),
        original_branch,
        original_head: head.id,
        steps,
        cursor: 0,
        interactive,
    };

    // Detach at the new base first: a dirty worktree fails here, before
    // any in-progress state exists.
    let mut index = repo.load_index()?;
    repo.worktree().checkout_tree(
        &mut index,
        &onto.tree_id,
        Some(&head.tree_id),
        CheckoutMode::Safe,
    )?;
    repo.save_index(&index)?;
    repo.refs.set_head_detached(onto.id)?;
    save_state(repo, &state)?;
    tracing::info!(onto = %onto.id, steps = state.steps.len(), "rebase started");

    let progress = run(repo);
    if matches!(progress, Ok(RebaseProgress::Complete(_))) {
        repo.record(
            "rebase",
            vec![upstream_spec.to_string()],
            format!("rebase onto {upstream_spec}"),
            before,
            None,
            None,
        );
    }
    progress
}

/// Drive the step loop from the persisted cursor.
fn run(repo: &Repository) -> Result<RebaseProgress, GitError> {
    let mut state = load_state(repo)?;

    while state.cursor < state.steps.len() {
        let step = state.steps[state.cursor].clone();
        if step.action == RebaseAction::Drop {
            state.cursor += 1;
            save_state(repo, &state)?;
            continue;
        }

        let step_commit = repo.store.peel_to_commit(&step.commit)?;
        let head = repo.head_commit()?.ok_or(GitError::NoCommitsYet)?;
        let base_tree = match step_commit.first_parent() {
            Some(parent) => Some(repo.store.peel_to_commit(&parent)?.tree_id),
            None => None,
        };

        let mut index = repo.load_index()?;
        let label = step.commit.to_string();
        let conflicts = merge_trees_into_worktree(
            repo,
            base_tree.as_ref(),
            &head.tree_id,
            &step_commit.tree_id,
            &label[..7],
            &mut index,
        )?;
        repo.save_index(&index)?;

        if !conflicts.is_empty() {
            save_state(repo, &state)?;
            tracing::info!(commit = %step.commit, "rebase stopped on conflicts");
            return Ok(RebaseProgress::Conflicted {
                commit: step.commit,
                paths: conflicts,
            });
        }

        let tree = index.build_tree(&repo.store)?;
        let new_head = commit_step(repo, &state, &step, &step_commit, &head, tree, None)?;
        state.cursor += 1;
        save_state(repo, &state)?;

        if step.action == RebaseAction::Edit {
            return Ok(RebaseProgress::Stopped(new_head));
        }
    }

    finish(repo, state)
}

/// Create (or amend) the commit for one applied step and move HEAD to it.
fn commit_step(
    repo: &Repository,
    _state: &RebaseState,
    step: &RebaseStep,
    original: &Commit,
    head: &Commit,
    tree: ObjectHash,
    message_override: Option<&str>,
) -> Result<ObjectHash, GitError> {
    let folded = matches!(step.action, RebaseAction::Squash | RebaseAction::Fixup)
        && !head.parent_commit_ids.is_empty();

    if !folded && tree == head.tree_id {
        // Empty patch (already applied upstream): skip without committing.
        return Ok(head.id);
    }

    let message = match step.action {
        RebaseAction::Fixup => head.message.clone(),
        RebaseAction::Squash => {
            let prev = head.message.trim_matches('\n');
            let this = step
                .message
                .as_deref()
                .unwrap_or(original.message.as_str())
                .trim_matches('\n');
            format!("\n{prev}\n\n{this}\n")
        }
        _ => match message_override.or(step.message.as_deref()) {
            Some(m) => format!("\n{}\n", m.trim_matches('\n')),
            None => original.message.clone(),
        },
    };

    let (parents, author) = if folded {
        (head.parent_commit_ids.clone(), head.author.clone())
    } else {
        (vec![head.id], original.author.clone())
    };

    let commit = Commit::new(
        author,
        repo.signature(SignatureKind::Committer),
        tree,
        parents,
        &message,
    );
    repo.store.write_obj(&commit)?;
    repo.refs.set_head_detached(commit.id)?;
    Ok(commit.id)
}

/// Conclude: move the original branch to the rebased tip and re-attach
/// HEAD, then clear the state directory.
fn finish(repo: &Repository, state: RebaseState) -> Result<RebaseProgress, GitError> {
    let final_head = repo
        .refs
        .head_commit()?
        .ok_or(GitError::NoCommitsYet)?;
    if let Some(branch) = &state.original_branch {
        let branch_ref = format!("refs/heads/{branch}");
        repo.refs
            .update_cas(&branch_ref, final_head, Some(state.original_head))?;
        repo.refs.set_head_symbolic(&branch_ref)?;
    }
    fs::remove_dir_all(repo.rebase_dir())?;
    tracing::info!(head = %final_head, "rebase complete");
    Ok(RebaseProgress::Complete(final_head))
}

/// After resolving a conflicted step and staging the result, commit it
/// (optionally with a replacement message) and continue the remaining
/// steps. Refuses while the index still holds conflict stages.
pub fn resolve_and_continue(
    repo: &Repository,
    message: Option<&str>,
) -> Result<RebaseProgress, GitError> {
    let mut state = load_state(repo)?;
    let index = repo.load_index()?;
    if index.has_conflicts() {
        return Err(GitError::MergeConflict(index.conflict_paths()));
    }
    let step = state
        .steps
        .get(state.cursor)
        .cloned()
        .ok_or_else(|| GitError::CustomError("rebase has no pending step".to_string()))?;
    let step_commit = repo.store.peel_to_commit(&step.commit)?;
    let head = repo.head_commit()?.ok_or(GitError::NoCommitsYet)?;

    let tree = index.build_tree(&repo.store)?;
    commit_step(repo, &state, &step, &step_commit, &head, tree, message)?;
    state.cursor += 1;
    save_state(repo, &state)?;
    run(repo)
}

/// Skip the pending step entirely and continue.
pub fn skip(repo: &Repository) -> Result<RebaseProgress, GitError> {
    let mut state = load_state(repo)?;
    let head = repo.head_commit()?.ok_or(GitError::NoCommitsYet)?;

    // Drop any half-applied conflict state and restore HEAD's tree.
    let mut index = repo.load_index()?;
    for path in index.conflict_paths() {
        index.remove(&path);
    }
    let head_tree = repo.store.peel_to_commit(&head.id)?.tree_id;
    repo.worktree()
        .checkout_tree(&mut index, &head_tree, None, CheckoutMode::Force)?;
    repo.save_index(&index)?;

    state.cursor += 1;
    save_state(repo, &state)?;
    run(repo)
}

/// Abort: restore the original branch, HEAD, index, and worktree.
pub fn abort(repo: &Repository) -> Result<(), GitError> {
    let state = load_state(repo)?;
    let before = repo.state_snapshot();

    let original = repo.store.peel_to_commit(&state.original_head)?;
    let mut index = repo.load_index()?;
    for path in index.conflict_paths() {
        index.remove(&path);
    }
    repo.worktree()
        .checkout_tree(&mut index, &original.tree_id, None, CheckoutMode::Force)?;
    repo.save_index(&index)?;

    match state.original_branch {
        Some(branch) => repo.refs.set_head_symbolic(&format!("refs/heads/{branch}"))?,
        None => repo.refs.set_head_detached(state.original_head)?,
    }
    fs::remove_dir_all(repo.rebase_dir())?;
    tracing::info!(restored = %state.original_head, "rebase aborted");
    repo.record(
        "rebase-abort",
        vec![],
        "rebase --abort".to_string(),
        before,
        None,
        Some(state.original_head),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;

    use super::{RebaseAction, RebaseProgress, abort, resolve_and_continue, start, start_interactive};
    use crate::{ancestry, hash::ObjectHash, repo::Repository};

    fn commit_file(repo: &Repository, path: &str, content: &str, msg: &str) -> ObjectHash {
        fs::write(repo.workdir().join(path), content).unwrap();
        let mut index = repo.load_index().unwrap();
        repo.stage_path(&mut index, path).unwrap();
        repo.save_index(&index).unwrap();
        repo.commit(msg).unwrap()
    }

    fn temp_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    /// Disjoint-file rebase completes; tree contents are preserved while
    /// commit ids change, and the branch re-attaches at the new tip.
    #[test]
    fn rebase_replays_commits() {
        let (_dir, repo) = temp_repo();
        let c0 = commit_file(&repo, "base.txt", "base\n", "c0");
        repo.create_branch("feat", None).unwrap();

        // main advances.
        let main1 = commit_file(&repo, "main.txt", "main\n", "main1");

        // feat gets two commits on the old base.
        repo.checkout_branch("feat").unwrap();
        let f1 = commit_file(&repo, "feat1.txt", "f1\n", "feat1");
        let f2 = commit_file(&repo, "feat2.txt", "f2\n", "feat2");

        let progress = start(&repo, "main").unwrap();
        let new_tip = match progress {
            RebaseProgress::Complete(tip) => tip,
            other => panic!("expected completion, got {other:?}"),
        };

        assert_eq!(repo.refs.current_branch().unwrap(), Some("feat".into()));
        assert_eq!(repo.refs.resolve("feat").unwrap(), Some(new_tip));
        assert!(!repo.rebase_dir().exists());
        assert!(ancestry::is_ancestor(&repo.store, main1, new_tip).unwrap());
        assert_ne!(new_tip, f2);

        // Content preservation: the replayed commits carry the same tree
        // contents (all four files present at the tip).
        for file in ["base.txt", "main.txt", "feat1.txt", "feat2.txt"] {
            assert!(repo.workdir().join(file).is_file(), "{file} missing");
        }

        // Messages preserved in order.
        let log = repo.log(None).unwrap();
        let messages: Vec<String> = log.iter().map(|c| c.format_message()).collect();
        assert_eq!(messages, vec!["feat2", "feat1", "main1", "c0"]);
        let _ = (c0, f1);
    }

    /// A conflicting step suspends with state on disk; resolving and
    /// continuing finishes the rebase with the resolved content.
    #[test]
    fn conflicted_rebase_resume() {
        let (_dir, repo) = temp_repo();
        let _c0 = commit_file(&repo, "x.txt", "base\n", "c0");
        repo.create_branch("feat", None).unwrap();
        commit_file(&repo, "x.txt", "main version\n", "main edit");
        repo.checkout_branch("feat").unwrap();
        let feat_commit = commit_file(&repo, "x.txt", "feat version\n", "feat edit");

        let progress = start(&repo, "main").unwrap();
        match progress {
            RebaseProgress::Conflicted { commit, paths } => {
                assert_eq!(commit, feat_commit);
                assert_eq!(paths, vec!["x.txt".to_string()]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(repo.rebase_dir().is_dir());
        assert!(matches!(repo.operation_in_progress(), Some("rebase")));
        let on_disk = fs::read_to_string(repo.workdir().join("x.txt")).unwrap();
        assert!(on_disk.contains("<<<<<<< HEAD"));

        // Continue refuses while unresolved.
        assert!(resolve_and_continue(&repo, None).is_err());

        fs::write(repo.workdir().join("x.txt"), "resolved\n").unwrap();
        let mut index = repo.load_index().unwrap();
        repo.stage_path(&mut index, "x.txt").unwrap();
        repo.save_index(&index).unwrap();

        let progress = resolve_and_continue(&repo, None).unwrap();
        let tip = match progress {
            RebaseProgress::Complete(tip) => tip,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(
            fs::read_to_string(repo.workdir().join("x.txt")).unwrap(),
            "resolved\n"
        );
        let tip_commit = repo.store.read_commit(&tip).unwrap();
        assert_eq!(tip_commit.format_message(), "feat edit");
        assert!(!repo.rebase_dir().exists());
    }

    /// Abort restores the original branch tip and worktree.
    #[test]
    fn abort_restores_original() {
        let (_dir, repo) = temp_repo();
        let _c0 = commit_file(&repo, "x.txt", "base\n", "c0");
        repo.create_branch("feat", None).unwrap();
        commit_file(&repo, "x.txt", "main version\n", "main edit");
        repo.checkout_branch("feat").unwrap();
        let feat_tip = commit_file(&repo, "x.txt", "feat version\n", "feat edit");

        match start(&repo, "main").unwrap() {
            RebaseProgress::Conflicted { .. } => {}
            other => panic!("expected conflict, got {other:?}"),
        }

        abort(&repo).unwrap();
        assert!(!repo.rebase_dir().exists());
        assert_eq!(repo.refs.current_branch().unwrap(), Some("feat".into()));
        assert_eq!(repo.refs.resolve("feat").unwrap(), Some(feat_tip));
        assert_eq!(
            fs::read_to_string(repo.workdir().join("x.txt")).unwrap(),
            "feat version\n"
        );
        assert!(!repo.load_index().unwrap().has_conflicts());
    }

    /// Interactive plan: drop removes a commit, squash folds two into one.
    #[test]
    fn interactive_drop_and_squash() {
        let (_dir, repo) = temp_repo();
        let _c0 = commit_file(&repo, "base.txt", "base\n", "c0");
        repo.create_branch("feat", None).unwrap();
        commit_file(&repo, "other.txt", "main\n", "main1");
        repo.checkout_branch("feat").unwrap();
        commit_file(&repo, "a.txt", "a\n", "feat a");
        commit_file(&repo, "b.txt", "b\n", "feat b");
        commit_file(&repo, "c.txt", "c\n", "feat c");

        let progress = start_interactive(&repo, "main", |mut steps| {
            assert_eq!(steps.len(), 3);
            steps[1].action = RebaseAction::Drop; // drop "feat b"
            steps[2].action = RebaseAction::Squash; // fold "feat c" into "feat a"
            steps
        })
        .unwrap();
        let tip = match progress {
            RebaseProgress::Complete(tip) => tip,
            other => panic!("expected completion, got {other:?}"),
        };

        // b.txt was dropped; a.txt and c.txt survived in one commit.
        assert!(!repo.workdir().join("b.txt").exists());
        assert!(repo.workdir().join("a.txt").is_file());
        assert!(repo.workdir().join("c.txt").is_file());

        let log = repo.log(None).unwrap();
        let messages: HashSet<String> = log.iter().map(|c| c.format_message()).collect();
        assert!(messages.contains("feat a"));
        assert!(!messages.contains("feat b"));
        assert!(!messages.contains("feat c")); // folded into "feat a"

        let tip_commit = repo.store.read_commit(&tip).unwrap();
        assert!(tip_commit.message.contains("feat a"));
        assert!(tip_commit.message.contains("feat c"));
    }
}
