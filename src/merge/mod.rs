//! Three-way merge driver: fast-forward detection via ancestry, the tree
//! merge classification table, content merges per divergent path, and the
//! `MERGE_HEAD`/`MERGE_MSG` pending-state handshake on conflicts.

pub mod content;

use std::collections::BTreeMap;
use std::fs;

use content::merge_blobs;

use crate::{
    ancestry,
    errors::GitError,
    hash::ObjectHash,
    index::hash_workfile,
    internal::object::{commit::Commit, signature::SignatureKind, types::ObjectType},
    repo::Repository,
    worktree::CheckoutMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    UpToDate,
    FastForward,
    Merged,
    Conflict,
}

#[derive(Debug, Clone)]
pub struct MergeResult {
    pub status: MergeStatus,
    pub new_commit: Option<ObjectHash>,
    pub conflicts: Vec<String>,
}

/// Per-path outcome of the tree merge.
enum PathOutcome {
    Keep(u32, ObjectHash),
    Delete,
    Conflict {
        base: Option<(u32, ObjectHash)>,
        ours: Option<(u32, ObjectHash)>,
        theirs: Option<(u32, ObjectHash)>,
        /// What to leave in the working file: marker text, or the ours
        /// bytes for modify/delete and binary conflicts.
        working: Vec<u8>,
    },
}

type FlatTree = BTreeMap<String, (u32, ObjectHash)>;

fn flat(repo: &Repository, tree: Option<&ObjectHash>) -> Result<FlatTree, GitError> {
    match tree {
        None => Ok(BTreeMap::new()),
        Some(t) => Ok(crate::odb::flatten_tree(&repo.store, t)?
            .into_iter()
            .map(|(p, (m, h))| (p, (m.to_index_mode(), h)))
            .collect()),
    }
}

/// Merge `other_spec` into HEAD.
pub fn merge(repo: &Repository, other_spec: &str) -> Result<MergeResult, GitError> {
    repo.ensure_no_operation().map_err(|e| { eprintln!("DEBUG ensure_no_operation {:?}", e); e })?;
    let before = repo.state_snapshot();

    let ours_commit = repo.head_commit().map_err(|e| { eprintln!("DEBUG head_commit {:?}", e); e })?.ok_or(GitError::NoCommitsYet)?;
    eprintln!("DEBUG ours_commit {:?}", ours_commit.id);
    let theirs_id = repo.rev(other_spec).map_err(|e| { eprintln!("DEBUG rev {:?}", e); e })?;
    eprintln!("DEBUG theirs_id {:?}", theirs_id);
    let theirs_commit = repo.store.peel_to_commit(&theirs_id).map_err(|e| { eprintln!("DEBUG peel_to_commit {:?}", e); e })?;
    eprintln!("DEBUG theirs_commit {:?}", theirs_commit.id);

    // Already-up-to-date and fast-forward short circuits.
    if ancestry::is_ancestor(&repo.store, theirs_commit.id, ours_commit.id).map_err(|e| { eprintln!("DEBUG is_ancestor1 {:?}", e); e })? {
        return Ok(MergeResult {
            status: MergeStatus::UpToDate,
            new_commit: None,
            conflicts: vec![],
        });
    }
    if ancestry::is_ancestor(&repo.store, ours_commit.id, theirs_commit.id)? {
        let mut index = repo.load_index()?;
        eprintln!("DEBUG before checkout_tree");
        repo.worktree().checkout_tree(
            &mut index,
            &theirs_commit.tree_id,
            Some(&ours_commit.tree_id),
            CheckoutMode::Safe,
        ).map_err(|e| { eprintln!("DEBUG checkout_tree err {:?}", e); e })?;
        eprintln!("DEBUG before save_index");
        repo.save_index(&index).map_err(|e| { eprintln!("DEBUG save_index err {:?}", e); e })?;
        eprintln!("DEBUG before advance_head");
        repo.advance_head(theirs_commit.id, Some(ours_commit.id)).map_err(|e| { eprintln!("DEBUG advance_head err {:?}", e); e })?;
        eprintln!("DEBUG after advance_head");
        tracing::info!(from = %ours_commit.id, to = %theirs_commit.id, "fast-forward");
        repo.record(
            "merge",
            vec![other_spec.to_string()],
            format!("fast-forward to {other_spec}"),
            before,
            None,
            Some(theirs_commit.id),
        );
        return Ok(MergeResult {
            status: MergeStatus::FastForward,
            new_commit: Some(theirs_commit.id),
            conflicts: vec![],
        });
    }

    let base_id = ancestry::merge_base(&repo.store, ours_commit.id, theirs_commit.id)?;
    let base_tree = match base_id {
        Some(b) => Some(repo.store.peel_to_commit(&b)?.tree_id),
        None => None,
    };

    let mut index = repo.load_index()?;
    let mut conflicts = merge_trees_into_worktree(
        repo,
        base_tree.as_ref(),
        &ours_commit.tree_id,
        &theirs_commit.tree_id,
        other_spec,
        &mut index,
    )?;

    if !conflicts.is_empty() {
        conflicts.sort();
        repo.save_index(&index)?;
        fs::write(repo.merge_head_path(), format!("{}\n", theirs_commit.id))?;
        fs::write(
            repo.merge_msg_path(),
            format!("{}\n", merge_message(repo, other_spec)?),
        )?;
        tracing::info!(paths = conflicts.len(), "merge stopped on conflicts");
        return Ok(MergeResult {
            status: MergeStatus::Conflict,
            new_commit: None,
            conflicts,
        });
    }

    repo.save_index(&index)?;
    let tree_id = index.build_tree(&repo.store)?;
    let commit = Commit::new(
        repo.signature(SignatureKind::Author),
        repo.signature(SignatureKind::Committer),
        tree_id,
        vec![ours_commit.id, theirs_commit.id],
        &format!("\n{}\n", merge_message(repo, other_spec)?),
    );
    repo.store.write_obj(&commit)?;
    repo.advance_head(commit.id, Some(ours_commit.id))?;
    tracing::info!(commit = %commit.id, "merge commit created");
    repo.record(
        "merge",
        vec![other_spec.to_string()],
        format!("merge {other_spec}"),
        before,
        None,
        Some(commit.id),
    );
    Ok(MergeResult {
        status: MergeStatus::Merged,
        new_commit: Some(commit.id),
        conflicts: vec![],
    })
}

fn merge_message(repo: &Repository, other_spec: &str) -> Result<String, GitError> {
    let into = repo
        .refs
        .current_branch()?
        .map(|b| format!(" into {b}"))
        .unwrap_or_default();
    Ok(format!("Merge '{other_spec}'{into}"))
}

/// Shared three-way application: classify every path of the union, guard
/// dirty working files, then apply keeps/deletes/conflicts to the worktree
/// and index. Returns the (sorted) conflicted paths. Used by merge and by
/// the rebase cherry-pick loop.
pub(crate) fn merge_trees_into_worktree(
    repo: &Repository,
    base_tree: Option<&ObjectHash>,
    ours_tree: &ObjectHash,
    theirs_tree: &ObjectHash,
    their_label: &str,
    index: &mut crate::index::Index,
) -> Result<Vec<String>, GitError> {
    let base_flat = flat(repo, base_tree)?;
    let ours_flat = flat(repo, Some(ours_tree))?;
    let theirs_flat = flat(repo, Some(theirs_tree))?;

    let outcomes = classify(repo, &base_flat, &ours_flat, &theirs_flat, their_label)?;

    // Refuse to clobber local edits on any path the merge needs to touch.
    guard_dirty_paths(repo, &ours_flat, &outcomes)?;

    let mut conflicts = Vec::new();
    let worktree = repo.worktree();

    for (path, outcome) in &outcomes {
        let ours_entry = ours_flat.get(path);
        match outcome {
            PathOutcome::Keep(mode, hash) => {
                if ours_entry == Some(&(*mode, *hash)) {
                    // Unchanged relative to ours; make sure it is staged.
                    if index.entry(path, 0).map(|e| e.hash) != Some(*hash) {
                        index.add_entry(crate::index::IndexEntry::bare(
                            path.clone(),
                            *mode,
                            *hash,
                        ));
                    }
                    continue;
                }
                let file = worktree.file_path(path);
                if let Some(parent) = file.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&file, repo.store.read_blob(hash)?.data)?;
                let meta = fs::symlink_metadata(&file)?;
                index.add(path, *mode, *hash, &meta);
            }
            PathOutcome::Delete => {
                let file = worktree.file_path(path);
                match fs::remove_file(&file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                index.remove(path);
            }
            PathOutcome::Conflict {
                base,
                ours,
                theirs,
                working,
            } => {
                conflicts.push(path.clone());
                let file = worktree.file_path(path);
                if let Some(parent) = file.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&file, working)?;
                index.add_conflict(path, *base, *ours, *theirs);
            }
        }
    }
    worktree.clean_empty_dirs()?;
    conflicts.sort();
    Ok(conflicts)
}

/// The three-way classification table, applied per path of the union.
fn classify(
    repo: &Repository,
    base: &FlatTree,
    ours: &FlatTree,
    theirs: &FlatTree,
    their_label: &str,
) -> Result<BTreeMap<String, PathOutcome>, GitError> {
    let mut paths: Vec<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    paths.sort();
    paths.dedup();

    let read = |entry: Option<&(u32, ObjectHash)>| -> Result<Vec<u8>, GitError> {
        match entry {
            Some((_, hash)) => Ok(repo.store.read_blob(hash)?.data),
            None => Ok(Vec::new()),
        }
    };

    let mut outcomes = BTreeMap::new();
    for path in paths {
        let b = base.get(path);
        let o = ours.get(path);
        let t = theirs.get(path);

        let outcome = if o == t {
            match o {
                Some((mode, hash)) => PathOutcome::Keep(*mode, *hash),
                None => PathOutcome::Delete,
            }
        } else if o == b {
            // Ours untouched: take theirs (possibly a deletion).
            match t {
                Some((mode, hash)) => PathOutcome::Keep(*mode, *hash),
                None => PathOutcome::Delete,
            }
        } else if t == b {
            match o {
                Some((mode, hash)) => PathOutcome::Keep(*mode, *hash),
                None => PathOutcome::Delete,
            }
        } else if o.is_none() || t.is_none() {
            // Modify/delete: one side deleted what the other changed.
            let surviving = read(o.or(t))?;
            PathOutcome::Conflict {
                base: b.copied(),
                ours: o.copied(),
                theirs: t.copied(),
                working: surviving,
            }
        } else {
            // Both changed (or add/add): line-level content merge; the
            // base is empty for add/add.
            let (o_mode, _) = o.expect("checked non-none above");
            let merged = merge_blobs(&read(b)?, &read(o)?, &read(t)?, "HEAD", their_label);
            if merged.is_conflicted() {
                PathOutcome::Conflict {
                    base: b.copied(),
                    ours: o.copied(),
                    theirs: t.copied(),
                    working: merged.bytes().to_vec(),
                }
            } else {
                let hash = repo.store.write(ObjectType::Blob, merged.bytes())?;
                PathOutcome::Keep(*o_mode, hash)
            }
        };
        outcomes.insert(path.clone(), outcome);
    }
    Ok(outcomes)
}

/// Any path the merge will touch whose working copy differs from the ours
/// tree blocks the merge, so local edits never get silently replaced.
fn guard_dirty_paths(
    repo: &Repository,
    ours: &FlatTree,
    outcomes: &BTreeMap<String, PathOutcome>,
) -> Result<(), GitError> {
    let mut dirty = Vec::new();
    for (path, outcome) in outcomes {
        let ours_entry = ours.get(path);
        let untouched = match outcome {
            PathOutcome::Keep(mode, hash) => ours_entry == Some(&(*mode, *hash)),
            PathOutcome::Delete => ours_entry.is_none(),
            PathOutcome::Conflict { .. } => false,
        };
        if untouched {
            continue;
        }
        let file = repo.workdir().join(path);
        let meta = match fs::symlink_metadata(&file) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() && !meta.file_type().is_symlink() {
            continue;
        }
        if let Some((mode, hash)) = ours_entry {
            if hash_workfile(&file, *mode)? != *hash {
                dirty.push(path.clone());
            }
        }
    }
    if dirty.is_empty() {
        Ok(())
    } else {
        Err(GitError::UncommittedChanges(dirty.join(", ")))
    }
}
