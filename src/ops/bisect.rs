//! Bisect: binary search over history for the first bad commit. The
//! session document lives at `bisect/session.json`; candidates are the
//! commits reachable from the bad tip but not from any good one, probes
//! pick the candidate that splits the remaining set most evenly, and an
//! optional test command drives the whole search automatically.

use std::collections::HashSet;
use std::fs;

use serde::{Deserialize, Serialize};

use crate::{
    ancestry,
    errors::GitError,
    hash::ObjectHash,
    odb::flatten_tree,
    repo::Repository,
    worktree::CheckoutMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Good,
    Bad,
    Skip,
}

/// One judged probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BisectStep {
    pub commit: ObjectHash,
    pub verdict: Verdict,
}

/// The crash-safe session document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BisectSession {
    pub good: Vec<ObjectHash>,
    pub bad: ObjectHash,
    pub skipped: Vec<ObjectHash>,
    pub current: Option<ObjectHash>,
    pub original_head: ObjectHash,
    pub original_branch: Option<String>,
    pub steps: Vec<BisectStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BisectStatus {
    /// A probe is checked out and awaiting a verdict.
    Bisecting {
        current: ObjectHash,
        remaining: usize,
    },
    /// The search converged.
    Done {
        first_bad: ObjectHash,
        changed_files: Vec<String>,
    },
}

fn session_path(repo: &Repository) -> std::path::PathBuf {
    repo.bisect_dir().join("session.json")
}

fn save_session(repo: &Repository, session: &BisectSession) -> Result<(), GitError> {
    fs::create_dir_all(repo.bisect_dir())?;
    let body = serde_json::to_string_pretty(session)
        .map_err(|e| GitError::CustomError(format!("bisect session: {e}")))?;
    fs::write(session_path(repo), body)?;
    Ok(())
}

fn load_session(repo: &Repository) -> Result<BisectSession, GitError> {
    let content = match fs::read_to_string(session_path(repo)) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GitError::CustomError("no bisect in progress".to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content)
        .map_err(|e| GitError::CustomError(format!("bisect session: {e}")))
}

/// Current session, if one is in progress.
pub fn status(repo: &Repository) -> Result<Option<BisectSession>, GitError> {
    if repo.bisect_dir().is_dir() {
        load_session(repo).map(Some)
    } else {
        Ok(None)
    }
}

/// Options for starting a bisect session.
#[derive(Debug, Default, Clone)]
pub struct BisectOptions {
    /// Only probe commits touching one of these paths (or files below
    /// them).
    pub focus_paths: Option<Vec<String>>,
    /// Shell command judging each probe (see `auto_run`).
    pub test_command: Option<String>,
}

/// Start bisecting between a known-bad tip and a known-good ancestor.
pub fn start(
    repo: &Repository,
    bad_spec: &str,
    good_spec: &str,
    options: BisectOptions,
) -> Result<BisectStatus, GitError> {
    repo.ensure_no_operation()?;

    let bad = repo.rev(bad_spec)?;
    let good = repo.rev(good_spec)?;
    if !ancestry::is_ancestor(&repo.store, good, bad)? {
        return Err(GitError::CustomError(format!(
            "{good_spec} is not an ancestor of {bad_spec}"
        )));
    }
    let original_head = repo
        .refs
        .head_commit()?
        .ok_or(GitError::NoCommitsYet)?;

    let mut session = BisectSession {
        good: vec![good],
        bad,
        skipped: vec![],
        current: None,
        original_head,
        original_branch: repo.refs.current_branch()?,
        steps: vec![],
        focus_paths: options.focus_paths,
        test_command: options.test_command,
        completed: false,
    };
    let status = select_and_checkout(repo, &mut session)?;
    save_session(repo, &session)?;
    tracing::info!(bad = %bad, good = %good, "bisect started");
    Ok(status)
}

/// Files changed by a commit relative to its first parent (all files for a
/// root commit).
pub fn changed_files(repo: &Repository, commit: &ObjectHash) -> Result<Vec<String>, GitError> {
    let commit = repo.store.peel_to_commit(commit)?;
    let current = flatten_tree(&repo.store, &commit.tree_id)?;
    let parent = match commit.first_parent() {
        Some(p) => flatten_tree(&repo.store, &repo.store.peel_to_commit(&p)?.tree_id)?,
        None => Default::default(),
    };
    let mut out: Vec<String> = Vec::new();
    for (path, entry) in &current {
        if parent.get(path) != Some(entry) {
            out.push(path.clone());
        }
    }
    for path in parent.keys() {
        if !current.contains_key(path) {
            out.push(path.clone());
        }
    }
    out.sort();
    Ok(out)
}

fn touches_focus(repo: &Repository, commit: &ObjectHash, focus: &[String]) -> Result<bool, GitError> {
    let changed = changed_files(repo, commit)?;
    Ok(changed.iter().any(|path| {
        focus
            .iter()
            .any(|f| path == f || path.starts_with(&format!("{f}/")))
    }))
}

/// The open suspect set: reachable from bad, not reachable from any good,
/// excluding the bad tip itself, skips, and (when focus paths are set)
/// commits that do not touch them.
fn candidates(
    repo: &Repository,
    session: &BisectSession,
) -> Result<Vec<ObjectHash>, GitError> {
    let suspects = ancestry::reachable(&repo.store, &[session.bad], &session.good)?;
    let skipped: HashSet<ObjectHash> = session.skipped.iter().copied().collect();
    let mut out = Vec::new();
    for candidate in suspects {
        if candidate == session.bad || skipped.contains(&candidate) {
            continue;
        }
        if let Some(focus) = &session.focus_paths {
            if !touches_focus(repo, &candidate, focus)? {
                continue;
            }
        }
        out.push(candidate);
    }
    Ok(out)
}

/// Pick the probe that splits the candidate set most evenly and check it
/// out (detached). An empty set means convergence: the bad tip is the
/// first bad commit.
fn select_and_checkout(
    repo: &Repository,
    session: &mut BisectSession,
) -> Result<BisectStatus, GitError> {
    let cands = candidates(repo, session)?;
    if cands.is_empty() {
        session.completed = true;
        session.current = Some(session.bad);
        let changed = changed_files(repo, &session.bad)?;
        tracing::info!(first_bad = %session.bad, "bisect converged");
        return Ok(BisectStatus::Done {
            first_bad: session.bad,
            changed_files: changed,
        });
    }

    let cand_set: HashSet<ObjectHash> = cands.iter().copied().collect();
    let n = cands.len();
    let mut best: Option<(usize, ObjectHash)> = None;
    for candidate in &cands {
        let below = ancestry::reachable(&repo.store, &[*candidate], &session.good)?
            .intersection(&cand_set)
            .count();
        let score = below.min(n - below);
        match best {
            Some((best_score, _)) if best_score >= score => {}
            _ => best = Some((score, *candidate)),
        }
    }
    let (_, probe) = best.expect("non-empty candidate set");

    let head_tree = repo.head_tree()?;
    let probe_tree = repo.store.peel_to_commit(&probe)?.tree_id;
    let mut index = repo.load_index()?;
    repo.worktree().checkout_tree(
        &mut index,
        &probe_tree,
        head_tree.as_ref(),
        CheckoutMode::Safe,
    )?;
    repo.save_index(&index)?;
    repo.refs.set_head_detached(probe)?;

    session.current = Some(probe);
    Ok(BisectStatus::Bisecting {
        current: probe,
        remaining: n,
    })
}

/// Record a verdict for the current probe and move to the next one.
pub fn mark(repo: &Repository, verdict: Verdict) -> Result<BisectStatus, GitError> {
    let mut session = load_session(repo)?;
    if session.completed {
        return Err(GitError::CustomError("bisect already completed".to_string()));
    }
    let current = session
        .current
        .ok_or_else(|| GitError::CustomError("no probe checked out".to_string()))?;

    session.steps.push(BisectStep {
        commit: current,
        verdict,
    });
    match verdict {
        Verdict::Good => session.good.push(current),
        Verdict::Bad => session.bad = current,
        Verdict::Skip => session.skipped.push(current),
    }

    let status = select_and_checkout(repo, &mut session)?;
    save_session(repo, &session)?;
    Ok(status)
}

pub fn mark_good(repo: &Repository) -> Result<BisectStatus, GitError> {
    mark(repo, Verdict::Good)
}

pub fn mark_bad(repo: &Repository) -> Result<BisectStatus, GitError> {
    mark(repo, Verdict::Bad)
}

pub fn skip(repo: &Repository) -> Result<BisectStatus, GitError> {
    mark(repo, Verdict::Skip)
}

/// Drive the session with its test command: exit 0 marks good, 1-124 bad,
/// 125 skip, 126+ aborts the run leaving the session intact.
pub fn auto_run(repo: &Repository) -> Result<BisectStatus, GitError> {
    let session = load_session(repo)?;
    let command = session
        .test_command
        .clone()
        .ok_or_else(|| GitError::CustomError("bisect has no test command".to_string()))?;
    let mut current = session
        .current
        .ok_or_else(|| GitError::CustomError("no probe checked out".to_string()))?;

    loop {
        let exit = std::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(repo.workdir())
            .status()?;
        let code = exit.code().unwrap_or(128);
        tracing::debug!(probe = %current, code, "bisect test result");
        let verdict = match code {
            0 => Verdict::Good,
            1..=124 => Verdict::Bad,
            125 => Verdict::Skip,
            _ => {
                return Err(GitError::CustomError(format!(
                    "bisect test command exited {code}"
                )));
            }
        };
        match mark(repo, verdict)? {
            BisectStatus::Bisecting { current: next, .. } => current = next,
            done @ BisectStatus::Done { .. } => return Ok(done),
        }
    }
}

/// End the session, restoring the original branch, HEAD, and worktree.
pub fn reset(repo: &Repository) -> Result<(), GitError> {
    let session = load_session(repo)?;
    let before = repo.state_snapshot();

    let original = repo.store.peel_to_commit(&session.original_head)?;
    let mut index = repo.load_index()?;
    repo.worktree()
        .checkout_tree(&mut index, &original.tree_id, None, CheckoutMode::Force)?;
    repo.save_index(&index)?;
    match session.original_branch {
        Some(branch) => repo.refs.set_head_symbolic(&format!("refs/heads/{branch}"))?,
        None => repo.refs.set_head_detached(session.original_head)?,
    }
    fs::remove_dir_all(repo.bisect_dir())?;
    tracing::info!(restored = %session.original_head, "bisect reset");
    repo.record(
        "bisect-reset",
        vec![],
        "bisect reset".to_string(),
        before,
        None,
        Some(session.original_head),
    );
    Ok(())
}
