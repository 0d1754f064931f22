//! End-to-end scenarios over real on-disk repositories: commit, merge,
//! reset, rebase, bisect, and a fetch negotiation exercised through the
//! pack codec the wire would carry.

use std::fs;

use rsgit::{
    Repository,
    hash::ObjectHash,
    internal::pack::{decode::Pack, encode::PackEncoder, entry::Entry},
    merge::{self, MergeStatus},
    ops::{
        bisect::{self, BisectOptions, BisectStatus},
        rebase::{self, RebaseProgress},
        reset::{self, ResetMode},
    },
    worktree::CheckoutMode,
};

fn commit_file(repo: &Repository, path: &str, content: &str, message: &str) -> ObjectHash {
    fs::write(repo.workdir().join(path), content).unwrap();
    let mut index = repo.load_index().unwrap();
    repo.stage_path(&mut index, path).unwrap();
    repo.save_index(&index).unwrap();
    repo.commit(message).unwrap()
}

fn temp_repo() -> (tempfile::TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    (dir, repo)
}

/// First commit: the store holds exactly a blob, a tree, and a commit;
/// HEAD and the branch resolve to it.
#[test]
fn first_commit() {
    let (_dir, repo) = temp_repo();
    let commit_id = commit_file(&repo, "a.txt", "hello\n", "init");

    let mut objects = repo.store.iter_objects().unwrap();
    objects.sort();
    assert_eq!(objects.len(), 3);
    assert!(
        objects
            .iter()
            .any(|h| h.to_string() == "ce013625030ba8dba906f756967f9e9ca394464a")
    );

    let commit = repo.store.read_commit(&commit_id).unwrap();
    assert!(commit.parent_commit_ids.is_empty());
    assert_eq!(repo.refs.resolve("refs/heads/main").unwrap(), Some(commit_id));
    assert_eq!(repo.refs.head_commit().unwrap(), Some(commit_id));
}

/// Fast-forward merge: main adopts feat's tip without a merge commit.
#[test]
fn fast_forward_merge() {
    let (_dir, repo) = temp_repo();
    let c0 = commit_file(&repo, "b.txt", "v0\n", "c0");
    repo.create_branch("feat", None).unwrap();
    repo.checkout_branch("feat").unwrap();
    commit_file(&repo, "b.txt", "v1\n", "c1");
    let c2 = commit_file(&repo, "b.txt", "v2\n", "c2");
    repo.checkout_branch("main").unwrap();

    let result = merge::merge(&repo, "feat").unwrap();
    assert_eq!(result.status, MergeStatus::FastForward);
    assert_eq!(repo.refs.resolve("main").unwrap(), Some(c2));
    assert_ne!(c0, c2);
    assert_eq!(
        fs::read_to_string(repo.workdir().join("b.txt")).unwrap(),
        "v2\n"
    );
    // No merge commit was created: c2 still has a single parent.
    let tip = repo.store.read_commit(&c2).unwrap();
    assert_eq!(tip.parent_commit_ids.len(), 1);
}

/// Conflicting merge: markers on disk, stages in the index, MERGE_HEAD
/// present until the resolution commit.
#[test]
fn conflicted_merge() {
    let (_dir, repo) = temp_repo();
    commit_file(&repo, "x.txt", "base\n", "c0");
    repo.create_branch("feat", None).unwrap();
    commit_file(&repo, "x.txt", "ours\n", "ours");
    repo.checkout_branch("feat").unwrap();
    commit_file(&repo, "x.txt", "theirs\n", "theirs");
    repo.checkout_branch("main").unwrap();

    let result = merge::merge(&repo, "feat").unwrap();
    assert_eq!(result.status, MergeStatus::Conflict);
    assert_eq!(result.conflicts, vec!["x.txt".to_string()]);
    assert_eq!(
        fs::read_to_string(repo.workdir().join("x.txt")).unwrap(),
        "<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> feat\n"
    );

    let index = repo.load_index().unwrap();
    assert!(index.entry("x.txt", 1).is_some());
    assert!(index.entry("x.txt", 2).is_some());
    assert!(index.entry("x.txt", 3).is_some());
    assert!(repo.merge_head_path().is_file());

    // Committing while unresolved is refused.
    assert!(repo.commit("too early").is_err());
}

/// Hard reset unships a commit and discards the uncommitted edit.
#[test]
fn reset_hard_unships() {
    let (_dir, repo) = temp_repo();
    commit_file(&repo, "f.txt", "one\n", "c1");
    let c2 = commit_file(&repo, "f.txt", "two\n", "c2");
    commit_file(&repo, "f.txt", "three\n", "c3");
    fs::write(repo.workdir().join("f.txt"), "scratch\n").unwrap();

    let target = reset::reset(&repo, ResetMode::Hard, "HEAD~1").unwrap();
    assert_eq!(target, c2);
    assert_eq!(repo.refs.head_commit().unwrap(), Some(c2));
    assert_eq!(
        fs::read_to_string(repo.workdir().join("f.txt")).unwrap(),
        "two\n"
    );
    assert!(repo.status().unwrap().is_clean());
}

/// Rebase preservation: replayed first-parent trees match the original
/// branch commits' trees, in order.
#[test]
fn rebase_preserves_trees() {
    let (_dir, repo) = temp_repo();
    commit_file(&repo, "base.txt", "base\n", "c0");
    repo.create_branch("feat", None).unwrap();
    commit_file(&repo, "main.txt", "main\n", "main1");
    repo.checkout_branch("feat").unwrap();
    let f1 = commit_file(&repo, "one.txt", "1\n", "feat1");
    let f2 = commit_file(&repo, "two.txt", "2\n", "feat2");

    let progress = rebase::start(&repo, "main").unwrap();
    let tip = match progress {
        RebaseProgress::Complete(tip) => tip,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_ne!(tip, f2);

    // Walk the two replayed commits from the new tip; their file contents
    // must match the originals (tree ids differ because main.txt joined).
    let new2 = repo.store.read_commit(&tip).unwrap();
    let new1 = repo
        .store
        .read_commit(&new2.parent_commit_ids[0])
        .unwrap();
    assert_eq!(new2.format_message(), "feat2");
    assert_eq!(new1.format_message(), "feat1");
    let old2 = repo.store.read_commit(&f2).unwrap();
    let old1 = repo.store.read_commit(&f1).unwrap();
    let tree_has = |tree: &ObjectHash, name: &str| -> bool {
        repo.store.read_tree(tree).unwrap().item(name).is_some()
    };
    assert!(tree_has(&new1.tree_id, "one.txt") && !tree_has(&old1.tree_id, "main.txt"));
    assert!(tree_has(&new2.tree_id, "two.txt") && tree_has(&new2.tree_id, "main.txt"));
}

/// Bisect over ten commits converges on the culprit within four probes.
#[test]
fn bisect_finds_culprit() {
    let (_dir, repo) = temp_repo();
    let mut commits = Vec::new();
    for i in 0..10 {
        fs::write(repo.workdir().join("n.txt"), format!("{i}\n")).unwrap();
        let mut index = repo.load_index().unwrap();
        repo.stage_path(&mut index, "n.txt").unwrap();
        if i == 5 {
            fs::write(repo.workdir().join("bug.txt"), "bug\n").unwrap();
            repo.stage_path(&mut index, "bug.txt").unwrap();
        }
        repo.save_index(&index).unwrap();
        commits.push(repo.commit(&format!("c{i}")).unwrap());
    }

    let status = bisect::start(
        &repo,
        &commits[9].to_string(),
        &commits[0].to_string(),
        BisectOptions {
            focus_paths: None,
            test_command: Some("test ! -f bug.txt".to_string()),
        },
    )
    .unwrap();
    assert!(matches!(status, BisectStatus::Bisecting { .. }));

    match bisect::auto_run(&repo).unwrap() {
        BisectStatus::Done {
            first_bad,
            changed_files,
        } => {
            assert_eq!(first_bad, commits[5]);
            assert!(changed_files.contains(&"bug.txt".to_string()));
        }
        other => panic!("expected convergence, got {other:?}"),
    }
    let session = bisect::status(&repo).unwrap().unwrap();
    assert!(session.steps.len() <= 4, "took {} probes", session.steps.len());
    bisect::reset(&repo).unwrap();
    assert_eq!(repo.refs.head_commit().unwrap(), Some(commits[9]));
}

/// The "wire" round trip of a fetch: the serving side packs the closure a
/// client is missing, the client indexes it and fast-forwards, ending up
/// byte-identical.
#[test]
fn fetch_shaped_pack_exchange() {
    let (_dir, server) = temp_repo();
    let c0 = commit_file(&server, "a.txt", "v0\n", "c0");
    let c1 = commit_file(&server, "a.txt", "v1\n", "c1");

    // "Clone": ship everything reachable from c0.
    let (_dir2, client) = temp_repo();
    let full: Vec<Entry> = server
        .store
        .iter_objects()
        .unwrap()
        .into_iter()
        .filter(|h| {
            // Only c0's closure: skip c1 and its tree/blob.
            let c1_commit = server.store.read_commit(&c1).unwrap();
            *h != c1
                && *h != c1_commit.tree_id
                && *h != server
                    .store
                    .read_tree(&c1_commit.tree_id)
                    .unwrap()
                    .tree_items[0]
                    .id
        })
        .map(|h| {
            let (t, d) = server.store.read(&h).unwrap();
            Entry::new(t, d)
        })
        .collect();
    let mut pack = Vec::new();
    PackEncoder::new(10).encode(full, &mut pack).unwrap();
    client.store.unpack(&pack).unwrap();
    client.refs.update("refs/heads/main", c0).unwrap();
    client.refs.update("refs/remotes/origin/main", c0).unwrap();
    {
        let tree = client.store.peel_to_commit(&c0).unwrap().tree_id;
        let mut index = client.load_index().unwrap();
        client
            .worktree()
            .checkout_tree(&mut index, &tree, None, CheckoutMode::Force)
            .unwrap();
        client.save_index(&index).unwrap();
    }

    // "Fetch": server packs what the client lacks (thin against c0).
    let missing: Vec<Entry> = {
        let c1_commit = server.store.read_commit(&c1).unwrap();
        let tree = server.store.read_tree(&c1_commit.tree_id).unwrap();
        let blob = server.store.read_blob(&tree.tree_items[0].id).unwrap();
        vec![
            Entry::from(c1_commit.clone()),
            Entry::from(tree.clone()),
            Entry::from(blob),
        ]
    };
    let mut pack2 = Vec::new();
    PackEncoder::new(10).encode(missing, &mut pack2).unwrap();

    // Client indexes the pack; every object must land bytewise identical.
    let decoded = Pack::decode(&pack2, |h| client.store.try_read(h).ok().flatten()).unwrap();
    for entry in &decoded.entries {
        let (t, d) = server.store.read(&entry.entry.hash).unwrap();
        assert_eq!(t, entry.entry.obj_type);
        assert_eq!(d, entry.entry.data);
    }
    client.store.unpack(&pack2).unwrap();
    client.refs.update("refs/remotes/origin/main", c1).unwrap();

    // Pull reduces to a fast-forward merge of the tracking ref.
    let result = merge::merge(&client, "origin/main").unwrap();
    assert_eq!(result.status, MergeStatus::FastForward);
    assert_eq!(client.refs.resolve("main").unwrap(), Some(c1));
    assert_eq!(
        fs::read_to_string(client.workdir().join("a.txt")).unwrap(),
        "v1\n"
    );
}

/// Index ↔ tree round trip at a realistic scale: build, reload, rebuild.
#[test]
fn index_tree_round_trip() {
    let (_dir, repo) = temp_repo();
    for (path, content) in [
        ("README.md", "readme\n"),
        ("src/lib.rs", "pub fn x() {}\n"),
        ("src/nested/deep/mod.rs", "mod deep;\n"),
        ("docs/guide.md", "guide\n"),
    ] {
        let file = repo.workdir().join(path);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, content).unwrap();
    }
    let mut index = repo.load_index().unwrap();
    for path in [
        "README.md",
        "src/lib.rs",
        "src/nested/deep/mod.rs",
        "docs/guide.md",
    ] {
        repo.stage_path(&mut index, path).unwrap();
    }
    let root = index.build_tree(&repo.store).unwrap();

    let mut reloaded = rsgit::index::Index::empty();
    reloaded.read_tree(&repo.store, &root).unwrap();
    assert_eq!(reloaded.flat(), index.flat());
    assert_eq!(reloaded.build_tree(&repo.store).unwrap(), root);
}
