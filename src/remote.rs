//! Remotes: configuration (`[remote "name"]`), refspecs with
//! single-segment globs, and the fetch / pull / push / clone operations
//! built on the smart HTTP client. Object transfer is reachability
//! bounded: only the closure the other side is missing goes over the wire.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::{
    ancestry,
    errors::GitError,
    hash::ObjectHash,
    internal::{
        object::{ObjectTrait, types::ObjectType},
        pack::{encode::PackEncoder, entry::Entry},
    },
    merge::{self, MergeResult},
    odb::ObjectStore,
    protocol::{
        client::HttpClient,
        types::{PushReport, RefUpdate, ServiceType},
    },
    repo::Repository,
    worktree::CheckoutMode,
};

/// A `[+]<src>:<dst>` mapping. `*` matches one path segment and must
/// appear in both sides or neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    pub force: bool,
    pub src: String,
    pub dst: String,
}

impl FromStr for RefSpec {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (force, rest) = match s.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (src, dst) = rest
            .split_once(':')
            .ok_or_else(|| GitError::InvalidRefspec(s.to_string()))?;
        if src.is_empty() || dst.is_empty() {
            return Err(GitError::InvalidRefspec(s.to_string()));
        }
        if src.matches('*').count() != dst.matches('*').count()
            || src.matches('*').count() > 1
        {
            return Err(GitError::InvalidRefspec(s.to_string()));
        }
        Ok(RefSpec {
            force,
            src: src.to_string(),
            dst: dst.to_string(),
        })
    }
}

impl std::fmt::Display for RefSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.force {
            write!(f, "+")?;
        }
        write!(f, "{}:{}", self.src, self.dst)
    }
}

impl RefSpec {
    /// The conventional fetch spec for a remote.
    pub fn default_fetch(remote: &str) -> RefSpec {
        RefSpec {
            force: true,
            src: "refs/heads/*".to_string(),
            dst: format!("refs/remotes/{remote}/*"),
        }
    }

    /// Map a source ref name through the spec, if it matches.
    pub fn map_source(&self, name: &str) -> Option<String> {
        match self.src.split_once('*') {
            None => (name == self.src).then(|| self.dst.clone()),
            Some((pre, post)) => {
                let captured = name.strip_prefix(pre)?.strip_suffix(post)?;
                if captured.is_empty() || captured.contains('/') {
                    return None;
                }
                Some(self.dst.replacen('*', captured, 1))
            }
        }
    }
}

/// A configured remote.
#[derive(Debug, Clone)]
pub struct Remote {
    pub name: String,
    pub fetch_url: String,
    pub push_url: Option<String>,
    pub fetch_spec: RefSpec,
    pub push_spec: Option<RefSpec>,
}

impl Remote {
    /// Load a remote from the repository configuration.
    pub fn load(repo: &Repository, name: &str) -> Result<Remote, GitError> {
        let url = repo
            .config
            .get("remote", Some(name), "url")
            .ok_or_else(|| GitError::InvalidConfig(format!("remote {name} is not configured")))?
            .to_string();
        let push_url = repo
            .config
            .get("remote", Some(name), "pushurl")
            .map(|s| s.to_string());
        let fetch_spec = match repo.config.get("remote", Some(name), "fetch") {
            Some(raw) => raw.parse()?,
            None => RefSpec::default_fetch(name),
        };
        let push_spec = repo
            .config
            .get("remote", Some(name), "push")
            .map(|raw| raw.parse())
            .transpose()?;
        Ok(Remote {
            name: name.to_string(),
            fetch_url: url,
            push_url,
            fetch_spec,
            push_spec,
        })
    }

    /// Configure a new remote with the conventional fetch spec.
    pub fn add(repo: &mut Repository, name: &str, url: &str) -> Result<(), GitError> {
        if repo.config.get("remote", Some(name), "url").is_some() {
            return Err(GitError::InvalidConfig(format!(
                "remote {name} already exists"
            )));
        }
        repo.config.set("remote", Some(name), "url", url);
        repo.config.set(
            "remote",
            Some(name),
            "fetch",
            &RefSpec::default_fetch(name).to_string(),
        );
        repo.config.save(&repo.git_dir().join("config"))
    }

    /// Configured remote names.
    pub fn list(repo: &Repository) -> Vec<String> {
        repo.config.subsections("remote")
    }
}

/// One tracking-ref movement observed during a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingUpdate {
    pub local_ref: String,
    pub remote_ref: String,
    pub old: Option<ObjectHash>,
    pub new: ObjectHash,
}

/// Outcome of a fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub updates: Vec<TrackingUpdate>,
    /// Objects received in the pack (0 when already current).
    pub received: usize,
    /// The remote's default branch, when advertised via symref.
    pub default_branch: Option<String>,
}

/// Local tips offered as `have`s: every ref value we hold.
fn local_tips(repo: &Repository) -> Result<Vec<ObjectHash>, GitError> {
    let mut tips: Vec<ObjectHash> = repo
        .refs
        .list("refs/")?
        .into_iter()
        .map(|(_, h)| h)
        .collect();
    if let Some(head) = repo.refs.head_commit()? {
        tips.push(head);
    }
    tips.sort();
    tips.dedup();
    Ok(tips)
}

/// Fetch from a configured remote: discover refs, negotiate, download and
/// index the pack, update remote-tracking refs, write FETCH_HEAD.
pub fn fetch(repo: &Repository, remote_name: &str) -> Result<FetchResult, GitError> {
    let before = repo.state_snapshot();
    let remote = Remote::load(repo, remote_name)?;
    let client = HttpClient::new(&remote.fetch_url);
    let adv = client.discover_refs(ServiceType::UploadPack)?;

    let mut result = FetchResult {
        default_branch: adv.default_branch.clone(),
        ..Default::default()
    };

    // Which advertised refs the fetch spec maps, and which need objects.
    let mut wants = Vec::new();
    let mut planned: Vec<TrackingUpdate> = Vec::new();
    for (name, hash) in &adv.refs {
        let Some(local_ref) = remote.fetch_spec.map_source(name) else {
            continue;
        };
        let old = repo.refs.resolve_full(&local_ref)?;
        if old != Some(*hash) {
            planned.push(TrackingUpdate {
                local_ref,
                remote_ref: name.clone(),
                old,
                new: *hash,
            });
        }
        if !repo.store.has(hash) {
            wants.push(*hash);
        }
    }

    if !wants.is_empty() {
        let haves = local_tips(repo)?;
        let pack = client.fetch_pack(&wants, &haves, None, &adv.capabilities, &mut |msg| {
            tracing::info!(target: "fetch-progress", "{msg}");
        })?;
        let (_signature, written) = repo.store.unpack(&pack)?;
        result.received = written.len();
    }

    // Objects precede ref updates; tracking refs are force-updated.
    for update in &planned {
        repo.refs.update(&update.local_ref, update.new)?;
    }
    result.updates = planned;

    // FETCH_HEAD: one line per fetched head.
    if !result.updates.is_empty() {
        let mut fetch_head = String::new();
        for update in &result.updates {
            let short = update
                .remote_ref
                .trim_start_matches("refs/heads/");
            fetch_head.push_str(&format!(
                "{}\t\tbranch '{short}' of {}\n",
                update.new, remote.fetch_url
            ));
        }
        fs::write(repo.git_dir().join("FETCH_HEAD"), fetch_head)?;
    }

    tracing::info!(
        remote = remote_name,
        refs = result.updates.len(),
        objects = result.received,
        "fetch complete"
    );
    repo.record(
        "fetch",
        vec![remote_name.to_string()],
        format!("fetch {remote_name}"),
        before,
        None,
        None,
    );
    Ok(result)
}

/// Pull: fetch, then merge the remote-tracking branch into HEAD.
pub fn pull(
    repo: &Repository,
    remote_name: &str,
    branch: Option<&str>,
) -> Result<MergeResult, GitError> {
    fetch(repo, remote_name)?;
    let branch = match branch {
        Some(b) => b.to_string(),
        None => repo
            .refs
            .current_branch()?
            .ok_or(GitError::DetachedHead)?,
    };
    let tracking = format!("refs/remotes/{remote_name}/{branch}");
    if repo.refs.resolve_full(&tracking)?.is_none() {
        return Err(GitError::RefNotFound(tracking));
    }
    merge::merge(repo, &format!("{remote_name}/{branch}"))
}

/// Collect the object closure to ship: commits reachable from `tip` but
/// not from `known`, plus every tree and blob those commits introduce.
fn object_closure(
    store: &ObjectStore,
    tip: ObjectHash,
    known: &[ObjectHash],
) -> Result<Vec<Entry>, GitError> {
    let known_present: Vec<ObjectHash> = known
        .iter()
        .copied()
        .filter(|h| store.has(h))
        .collect();
    let commits = ancestry::reachable(store, &[tip], &known_present)?;

    // The frontier's trees and blobs are already on the other side.
    let mut excluded: HashSet<ObjectHash> = HashSet::new();
    for tip in &known_present {
        let commit = store.peel_to_commit(tip)?;
        collect_tree(store, &commit.tree_id, &mut excluded, &mut Vec::new())?;
    }

    let mut seen = excluded.clone();
    let mut commit_entries = Vec::new();
    let mut tree_blob_entries = Vec::new();
    for commit_id in &commits {
        let (obj_type, data) = store.read(commit_id)?;
        commit_entries.push(Entry::new(obj_type, data));
        let commit = store.peel_to_commit(commit_id)?;
        collect_tree(store, &commit.tree_id, &mut seen, &mut tree_blob_entries)?;
    }
    commit_entries.extend(tree_blob_entries);
    Ok(commit_entries)
}

fn collect_tree(
    store: &ObjectStore,
    tree_id: &ObjectHash,
    seen: &mut HashSet<ObjectHash>,
    out: &mut Vec<Entry>,
) -> Result<(), GitError> {
    if !seen.insert(*tree_id) {
        return Ok(());
    }
    let (_, data) = store.read(tree_id)?;
    let tree = crate::internal::object::tree::Tree::from_bytes(&data, *tree_id)?;
    out.push(Entry::new(ObjectType::Tree, data));
    for item in &tree.tree_items {
        if item.mode.is_tree() {
            collect_tree(store, &item.id, seen, out)?;
        } else if item.mode != crate::internal::object::tree::TreeItemMode::Commit
            && seen.insert(item.id)
        {
            let (obj_type, data) = store.read(&item.id)?;
            out.push(Entry::new(obj_type, data));
        }
    }
    Ok(())
}

/// Push a branch to a remote. Without `refspec`, the current branch pushes
/// to its same-named remote ref. Rejects non-fast-forward updates unless
/// the spec carries `+`.
pub fn push(
    repo: &Repository,
    remote_name: &str,
    refspec: Option<&str>,
) -> Result<PushReport, GitError> {
    let before = repo.state_snapshot();
    let remote = Remote::load(repo, remote_name)?;

    let spec: RefSpec = match refspec {
        Some(raw) => raw.parse()?,
        None => match &remote.push_spec {
            Some(spec) => spec.clone(),
            None => {
                let branch = repo
                    .refs
                    .current_branch()?
                    .ok_or(GitError::DetachedHead)?;
                RefSpec {
                    force: false,
                    src: format!("refs/heads/{branch}"),
                    dst: format!("refs/heads/{branch}"),
                }
            }
        },
    };
    if spec.src.contains('*') {
        return Err(GitError::InvalidRefspec(format!(
            "push spec must name a single ref: {spec}"
        )));
    }

    let local = repo.refs.resolve_existing(&spec.src)?;
    let url = remote.push_url.as_deref().unwrap_or(&remote.fetch_url);
    let client = HttpClient::new(url);
    let adv = client.discover_refs(ServiceType::ReceivePack)?;
    let remote_old = adv.resolve(&spec.dst);

    if let Some(old) = remote_old {
        if old == local {
            tracing::info!(refname = %spec.dst, "already up to date");
            return Ok(PushReport {
                unpack_ok: true,
                results: vec![],
            });
        }
        if !spec.force {
            let can_ff = repo.store.has(&old)
                && ancestry::is_ancestor(&repo.store, old, local)?;
            if !can_ff {
                return Err(GitError::NotFastForward(spec.dst.clone()));
            }
        }
    }

    // Everything the server advertised counts as known.
    let known: Vec<ObjectHash> = adv.refs.iter().map(|(_, h)| h).copied().collect();
    let entries = object_closure(&repo.store, local, &known)?;
    let mut pack = Vec::new();
    PackEncoder::new(10).encode(entries, &mut pack)?;

    let update = RefUpdate {
        old: remote_old.unwrap_or_else(ObjectHash::zero),
        new: local,
        name: spec.dst.clone(),
    };
    let report = client.push_pack(&[update], &pack)?;
    if !report.unpack_ok {
        return Err(GitError::network("server failed to unpack the push"));
    }
    if let Some(rejected) = report.results.iter().find(|r| !r.ok) {
        return Err(GitError::NotFastForward(format!(
            "{}: {}",
            rejected.name,
            rejected.message.as_deref().unwrap_or("rejected")
        )));
    }

    // Mirror the accepted update into the remote-tracking namespace.
    if let Some(tracking) = remote.fetch_spec.map_source(&spec.dst) {
        repo.refs.update(&tracking, local)?;
    }
    tracing::info!(remote = remote_name, refname = %spec.dst, "push complete");
    repo.record(
        "push",
        vec![remote_name.to_string(), spec.to_string()],
        format!("push {remote_name} {spec}"),
        before,
        None,
        Some(local),
    );
    Ok(report)
}

/// Clone: init, configure origin, fetch everything, then check out the
/// default branch.
pub fn clone_repo(url: &str, dest: impl AsRef<Path>) -> Result<Repository, GitError> {
    let dest = dest.as_ref();
    fs::create_dir_all(dest)?;
    let mut repo = Repository::init(dest)?;
    Remote::add(&mut repo, "origin", url)?;

    let result = fetch(&repo, "origin")?;
    let branch = result
        .default_branch
        .clone()
        .or_else(|| {
            result.updates.first().map(|u| {
                u.remote_ref
                    .trim_start_matches("refs/heads/")
                    .to_string()
            })
        });

    if let Some(branch) = branch {
        let tracking = format!("refs/remotes/origin/{branch}");
        let target = repo.refs.resolve_existing(&tracking)?;
        repo.refs
            .update(&format!("refs/heads/{branch}"), target)?;
        repo.refs
            .set_head_symbolic(&format!("refs/heads/{branch}"))?;

        let tree = repo.store.peel_to_commit(&target)?.tree_id;
        let mut index = repo.load_index()?;
        repo.worktree()
            .checkout_tree(&mut index, &tree, None, CheckoutMode::Force)?;
        repo.save_index(&index)?;

        repo.config.set("branch", Some(&branch), "remote", "origin");
        repo.config
            .set("branch", Some(&branch), "merge", &format!("refs/heads/{branch}"));
        repo.config.save(&repo.git_dir().join("config"))?;
    }
    tracing::info!(url, dest = %dest.display(), "clone complete");
    Ok(repo)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{RefSpec, Remote, object_closure};
    use crate::{
        hash::ObjectHash,
        internal::object::{
            blob::Blob,
            commit::Commit,
            signature::{Signature, SignatureKind},
            tree::{Tree, TreeItem, TreeItemMode},
            types::ObjectType,
        },
        odb::ObjectStore,
        repo::Repository,
    };

    /// Refspec parsing: force flag, glob arity, malformed cases.
    #[test]
    fn refspec_parsing() {
        let spec = RefSpec::from_str("+refs/heads/*:refs/remotes/origin/*").unwrap();
        assert!(spec.force);
        assert_eq!(spec.src, "refs/heads/*");

        let plain = RefSpec::from_str("refs/heads/main:refs/heads/main").unwrap();
        assert!(!plain.force);

        assert!(RefSpec::from_str("refs/heads/main").is_err());
        assert!(RefSpec::from_str("refs/heads/*:refs/remotes/origin/main").is_err());
        assert!(RefSpec::from_str("refs/**:refs/x/**").is_err());
    }

    /// Glob mapping captures a single segment only.
    #[test]
    fn refspec_mapping() {
        let spec = RefSpec::default_fetch("origin");
        assert_eq!(
            spec.map_source("refs/heads/main").as_deref(),
            Some("refs/remotes/origin/main")
        );
        assert_eq!(spec.map_source("refs/heads/a/b"), None);
        assert_eq!(spec.map_source("refs/tags/v1"), None);

        let exact = RefSpec::from_str("refs/heads/main:refs/heads/mirror").unwrap();
        assert_eq!(
            exact.map_source("refs/heads/main").as_deref(),
            Some("refs/heads/mirror")
        );
        assert_eq!(exact.map_source("refs/heads/other"), None);
    }

    /// Remote round-trips through the configuration.
    #[test]
    fn remote_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = Repository::init(dir.path()).unwrap();
        Remote::add(&mut repo, "origin", "https://example.com/repo.git").unwrap();
        assert!(Remote::add(&mut repo, "origin", "https://other.example/x.git").is_err());

        let reopened = Repository::open(dir.path()).unwrap();
        let remote = Remote::load(&reopened, "origin").unwrap();
        assert_eq!(remote.fetch_url, "https://example.com/repo.git");
        assert_eq!(remote.fetch_spec, RefSpec::default_fetch("origin"));
        assert_eq!(Remote::list(&reopened), vec!["origin".to_string()]);
        assert!(Remote::load(&reopened, "upstream").is_err());
    }

    fn make_commit(
        store: &ObjectStore,
        parents: Vec<ObjectHash>,
        file: &str,
        content: &str,
    ) -> ObjectHash {
        let blob = Blob::from_content(content);
        store.write_obj(&blob).unwrap();
        let tree = Tree::from_tree_items(vec![TreeItem::new(
            TreeItemMode::Blob,
            blob.id,
            file.to_string(),
        )])
        .unwrap();
        store.write_obj(&tree).unwrap();
        let sig =
            |k| Signature::new_at(k, "A".into(), "a@x".into(), 1700000000, "+0000".to_string());
        let commit = Commit::new(
            sig(SignatureKind::Author),
            sig(SignatureKind::Committer),
            tree.id,
            parents,
            "\nc\n",
        );
        store.write_obj(&commit).unwrap();
        commit.id
    }

    /// The closure for a push contains exactly the new commit, its tree,
    /// and its blob when the remote already has the parent.
    #[test]
    fn closure_is_reachability_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        let c0 = make_commit(&store, vec![], "f.txt", "v0\n");
        let c1 = make_commit(&store, vec![c0], "f.txt", "v1\n");

        let entries = object_closure(&store, c1, &[c0]).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].obj_type, ObjectType::Commit);
        assert_eq!(entries[0].hash, c1);
        assert!(entries.iter().any(|e| e.obj_type == ObjectType::Tree));
        assert!(
            entries
                .iter()
                .any(|e| e.obj_type == ObjectType::Blob && e.data == b"v1\n")
        );

        // With nothing known, everything ships.
        let all = object_closure(&store, c1, &[]).unwrap();
        assert_eq!(all.len(), 6);
    }
}
