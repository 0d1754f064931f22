//! Commit-graph queries: history walks, reachability, merge bases, and
//! distance counting. The graph is a DAG by construction (a commit's id
//! depends on its parents'), so walks only need visited-set bookkeeping.

use std::collections::{HashSet, VecDeque};

use crate::{
    errors::GitError, hash::ObjectHash, internal::object::commit::Commit, odb::ObjectStore,
};

/// Iterator over commits, newest first. First-parent mode follows only
/// `parents[0]`; full mode visits every parent, ordering ready commits by
/// committer timestamp (topological within the fence).
pub struct Walk<'a> {
    store: &'a ObjectStore,
    frontier: Vec<Commit>,
    visited: HashSet<ObjectHash>,
    first_parent: bool,
    remaining: Option<usize>,
}

impl<'a> Walk<'a> {
    pub fn new(store: &'a ObjectStore, start: ObjectHash) -> Result<Walk<'a>, GitError> {
        let commit = store.read_commit(&start)?;
        Ok(Walk {
            store,
            frontier: vec![commit],
            visited: HashSet::from([start]),
            first_parent: true,
            remaining: None,
        })
    }

    /// Follow every parent instead of only the first.
    pub fn all_parents(mut self) -> Self {
        self.first_parent = false;
        self
    }

    /// Stop after yielding at most `n` commits.
    pub fn limit(mut self, n: usize) -> Self {
        self.remaining = Some(n);
        self
    }
}

impl Iterator for Walk<'_> {
    type Item = Result<Commit, GitError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(remaining) = &mut self.remaining {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        // Pop the newest pending commit.
        let best = self
            .frontier
            .iter()
            .enumerate()
            .max_by_key(|(_, c)| c.committer.timestamp)?
            .0;
        let commit = self.frontier.swap_remove(best);

        let parents: &[ObjectHash] = if self.first_parent {
            &commit.parent_commit_ids[..commit.parent_commit_ids.len().min(1)]
        } else {
            &commit.parent_commit_ids
        };
        for parent in parents {
            if self.visited.insert(*parent) {
                match self.store.read_commit(parent) {
                    Ok(c) => self.frontier.push(c),
                    Err(e) => return Some(Err(e)),
                }
            }
        }
        Some(Ok(commit))
    }
}

/// All commits reachable from `tips`, minus anything reachable from `stop`
/// commits (the stop set itself is excluded).
pub fn reachable(
    store: &ObjectStore,
    tips: &[ObjectHash],
    stop: &[ObjectHash],
) -> Result<HashSet<ObjectHash>, GitError> {
    let mut fence = HashSet::new();
    for s in stop {
        collect_ancestors(store, *s, &mut fence)?;
    }
    let mut out = HashSet::new();
    let mut queue: VecDeque<ObjectHash> = tips.iter().copied().collect();
    while let Some(hash) = queue.pop_front() {
        if fence.contains(&hash) || !out.insert(hash) {
            continue;
        }
        let commit = store.read_commit(&hash)?;
        queue.extend(commit.parent_commit_ids);
    }
    Ok(out)
}

fn collect_ancestors(
    store: &ObjectStore,
    start: ObjectHash,
    out: &mut HashSet<ObjectHash>,
) -> Result<(), GitError> {
    let mut queue = VecDeque::from([start]);
    while let Some(hash) = queue.pop_front() {
        if !out.insert(hash) {
            continue;
        }
        let commit = store.read_commit(&hash)?;
        queue.extend(commit.parent_commit_ids);
    }
    Ok(())
}

/// Whether `ancestor` is reachable from `descendant` (inclusive: a commit
/// is its own ancestor).
pub fn is_ancestor(
    store: &ObjectStore,
    ancestor: ObjectHash,
    descendant: ObjectHash,
) -> Result<bool, GitError> {
    if ancestor == descendant {
        return Ok(true);
    }
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([descendant]);
    while let Some(hash) = queue.pop_front() {
        if hash == ancestor {
            return Ok(true);
        }
        if !visited.insert(hash) {
            continue;
        }
        let commit = store.read_commit(&hash)?;
        queue.extend(commit.parent_commit_ids);
    }
    Ok(false)
}

/// Lowest common ancestor of `a` and `b`: color every ancestor of `a`,
/// then BFS from `b` and return the first colored commit found. Criss-cross
/// histories with several minimal bases return the earliest discovered one,
/// deterministically.
pub fn merge_base(
    store: &ObjectStore,
    a: ObjectHash,
    b: ObjectHash,
) -> Result<Option<ObjectHash>, GitError> {
    let mut colored = HashSet::new();
    collect_ancestors(store, a, &mut colored)?;

    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([b]);
    while let Some(hash) = queue.pop_front() {
        if colored.contains(&hash) {
            return Ok(Some(hash));
        }
        if !visited.insert(hash) {
            continue;
        }
        let commit = store.read_commit(&hash)?;
        queue.extend(commit.parent_commit_ids);
    }
    Ok(None)
}

/// Number of commits reachable from `to` but not from `from` (how far
/// `to` is ahead).
pub fn count_between(
    store: &ObjectStore,
    from: ObjectHash,
    to: ObjectHash,
) -> Result<usize, GitError> {
    Ok(reachable(store, &[to], &[from])?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::{
        ObjectTrait,
        blob::Blob,
        commit::Commit,
        signature::{Signature, SignatureKind},
        tree::{Tree, TreeItem, TreeItemMode},
    };

    /// Build a commit whose tree holds one file with the given content,
    /// stamped at `when` so walk ordering is deterministic.
    fn make_commit(
        store: &ObjectStore,
        parents: Vec<ObjectHash>,
        content: &str,
        when: i64,
    ) -> ObjectHash {
        let blob = Blob::from_content(content);
        store.write_obj(&blob).unwrap();
        let tree = Tree::from_tree_items(vec![TreeItem::new(
            TreeItemMode::Blob,
            blob.id,
            "f.txt".to_string(),
        )])
        .unwrap();
        store.write_obj(&tree).unwrap();
        let sig = |kind| {
            Signature::new_at(kind, "A".into(), "a@x".into(), when, "+0000".to_string())
        };
        let commit = Commit::new(
            sig(SignatureKind::Author),
            sig(SignatureKind::Committer),
            tree.id,
            parents,
            &format!("\n{content}\n"),
        );
        store.write_obj(&commit).unwrap();
        commit.id
    }

    fn test_store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        (dir, store)
    }

    /// Linear history: walk yields newest-to-oldest, limit applies.
    #[test]
    fn linear_walk() {
        let (_dir, store) = test_store();
        let c0 = make_commit(&store, vec![], "c0", 100);
        let c1 = make_commit(&store, vec![c0], "c1", 200);
        let c2 = make_commit(&store, vec![c1], "c2", 300);

        let walked: Vec<ObjectHash> = Walk::new(&store, c2)
            .unwrap()
            .map(|c| c.unwrap().id)
            .collect();
        assert_eq!(walked, vec![c2, c1, c0]);

        let limited: Vec<ObjectHash> = Walk::new(&store, c2)
            .unwrap()
            .limit(2)
            .map(|c| c.unwrap().id)
            .collect();
        assert_eq!(limited, vec![c2, c1]);
    }

    /// First-parent walk skips the side branch of a merge; all-parents
    /// visits it.
    #[test]
    fn merge_walks() {
        let (_dir, store) = test_store();
        let c0 = make_commit(&store, vec![], "c0", 100);
        let main1 = make_commit(&store, vec![c0], "main1", 200);
        let side1 = make_commit(&store, vec![c0], "side1", 250);
        let merge = make_commit(&store, vec![main1, side1], "merge", 300);

        let first: Vec<ObjectHash> = Walk::new(&store, merge)
            .unwrap()
            .map(|c| c.unwrap().id)
            .collect();
        assert_eq!(first, vec![merge, main1, c0]);

        let all: HashSet<ObjectHash> = Walk::new(&store, merge)
            .unwrap()
            .all_parents()
            .map(|c| c.unwrap().id)
            .collect();
        assert_eq!(all, HashSet::from([merge, main1, side1, c0]));
    }

    /// merge_base soundness: the base is an ancestor of both tips, and for
    /// diverged branches it is the fork point.
    #[test]
    fn merge_base_fork() {
        let (_dir, store) = test_store();
        let c0 = make_commit(&store, vec![], "c0", 100);
        let a = make_commit(&store, vec![c0], "a", 200);
        let b = make_commit(&store, vec![c0], "b", 210);

        let base = merge_base(&store, a, b).unwrap().unwrap();
        assert_eq!(base, c0);
        assert!(is_ancestor(&store, base, a).unwrap());
        assert!(is_ancestor(&store, base, b).unwrap());
    }

    /// When one tip is an ancestor of the other, it is the base.
    #[test]
    fn merge_base_fast_forward_shape() {
        let (_dir, store) = test_store();
        let c0 = make_commit(&store, vec![], "c0", 100);
        let c1 = make_commit(&store, vec![c0], "c1", 200);
        assert_eq!(merge_base(&store, c0, c1).unwrap(), Some(c0));
        assert_eq!(merge_base(&store, c1, c0).unwrap(), Some(c0));
    }

    /// Disjoint histories have no base.
    #[test]
    fn merge_base_disjoint() {
        let (_dir, store) = test_store();
        let a = make_commit(&store, vec![], "a", 100);
        let b = make_commit(&store, vec![], "b", 100);
        assert_eq!(merge_base(&store, a, b).unwrap(), None);
    }

    /// is_ancestor and count_between over a small chain.
    #[test]
    fn ancestry_counts() {
        let (_dir, store) = test_store();
        let c0 = make_commit(&store, vec![], "c0", 100);
        let c1 = make_commit(&store, vec![c0], "c1", 200);
        let c2 = make_commit(&store, vec![c1], "c2", 300);

        assert!(is_ancestor(&store, c0, c2).unwrap());
        assert!(!is_ancestor(&store, c2, c0).unwrap());
        assert_eq!(count_between(&store, c0, c2).unwrap(), 2);
        assert_eq!(count_between(&store, c2, c2).unwrap(), 0);
    }
}
