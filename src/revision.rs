//! Revision expression resolution: ref names (with the short-name search
//! order), unambiguous hex prefixes of four or more characters, and the
//! suffix operators `~N` (walk first parents) and `^N` (Nth parent of a
//! merge).

use crate::{
    errors::GitError, hash::ObjectHash, odb::ObjectStore, refs::RefStore,
};

/// Resolve a revision expression to a commit id.
pub fn resolve(refs: &RefStore, store: &ObjectStore, spec: &str) -> Result<ObjectHash, GitError> {
    if spec.is_empty() {
        return Err(GitError::InvalidRevision(spec.to_string()));
    }

    let op_at = spec.find(['~', '^']);
    let (base, ops) = match op_at {
        Some(i) => (&spec[..i], &spec[i..]),
        None => (spec, ""),
    };

    let mut current = resolve_base(refs, store, base, spec)?;

    let mut rest = ops;
    while !rest.is_empty() {
        let op = rest.as_bytes()[0];
        rest = &rest[1..];
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let count: Option<usize> = if digits_end == 0 {
            None
        } else {
            Some(
                rest[..digits_end]
                    .parse()
                    .map_err(|_| GitError::InvalidRevision(spec.to_string()))?,
            )
        };
        rest = &rest[digits_end..];

        match op {
            b'~' => {
                let n = count.unwrap_or(1);
                for _ in 0..n {
                    current = first_parent(store, current, spec)?;
                }
            }
            b'^' => match count {
                None | Some(1) => current = first_parent(store, current, spec)?,
                Some(0) => {
                    // ^0 peels to the commit itself.
                    current = store.peel_to_commit(&current)?.id;
                }
                Some(n) => {
                    let commit = store.peel_to_commit(&current)?;
                    current = *commit
                        .parent_commit_ids
                        .get(n - 1)
                        .ok_or_else(|| GitError::InvalidRevision(spec.to_string()))?;
                }
            },
            _ => return Err(GitError::InvalidRevision(spec.to_string())),
        }
    }

    Ok(current)
}

fn first_parent(
    store: &ObjectStore,
    current: ObjectHash,
    spec: &str,
) -> Result<ObjectHash, GitError> {
    store
        .peel_to_commit(&current)?
        .first_parent()
        .ok_or_else(|| GitError::InvalidRevision(spec.to_string()))
}

fn resolve_base(
    refs: &RefStore,
    store: &ObjectStore,
    base: &str,
    spec: &str,
) -> Result<ObjectHash, GitError> {
    // Refs take precedence over hex-looking names, matching git.
    if let Some(hash) = refs.resolve(base)? {
        return Ok(hash);
    }

    let is_hex = base.len() >= 4
        && base.len() <= ObjectHash::HEX_LEN
        && base.chars().all(|c| c.is_ascii_hexdigit());
    if is_hex {
        let lowered = base.to_ascii_lowercase();
        let matches = store.prefix_matches(&lowered)?;
        match matches.len() {
            1 => return Ok(matches[0]),
            0 => {}
            _ => {
                return Err(GitError::InvalidRevision(format!(
                    "{spec}: ambiguous prefix ({} matches)",
                    matches.len()
                )));
            }
        }
    }

    Err(GitError::InvalidRevision(spec.to_string()))
}

#[cfg(test)]
mod tests {
    use super::resolve;
    use crate::{
        hash::ObjectHash,
        internal::object::{
            ObjectTrait,
            blob::Blob,
            commit::Commit,
            signature::{Signature, SignatureKind},
            tree::{Tree, TreeItem, TreeItemMode},
        },
        odb::ObjectStore,
        refs::RefStore,
    };

    fn make_commit(store: &ObjectStore, parents: Vec<ObjectHash>, tag: &str) -> ObjectHash {
        let blob = Blob::from_content(tag);
        store.write_obj(&blob).unwrap();
        let tree = Tree::from_tree_items(vec![TreeItem::new(
            TreeItemMode::Blob,
            blob.id,
            "f".to_string(),
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
            &format!("\n{tag}\n"),
        );
        store.write_obj(&commit).unwrap();
        commit.id
    }

    fn setup() -> (tempfile::TempDir, ObjectStore, RefStore, Vec<ObjectHash>) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path().join("objects")).unwrap();
        let refs = RefStore::new(dir.path());
        let c0 = make_commit(&store, vec![], "c0");
        let c1 = make_commit(&store, vec![c0], "c1");
        let c2 = make_commit(&store, vec![c1], "c2");
        refs.update("refs/heads/main", c2).unwrap();
        refs.set_head_symbolic("refs/heads/main").unwrap();
        (dir, store, refs, vec![c0, c1, c2])
    }

    /// Plain names, HEAD, and full hashes resolve.
    #[test]
    fn plain_names() {
        let (_d, store, refs, c) = setup();
        assert_eq!(resolve(&refs, &store, "main").unwrap(), c[2]);
        assert_eq!(resolve(&refs, &store, "HEAD").unwrap(), c[2]);
        assert_eq!(resolve(&refs, &store, &c[0].to_string()).unwrap(), c[0]);
    }

    /// `~N` and `^` walk first parents; combinations chain.
    #[test]
    fn tilde_and_caret() {
        let (_d, store, refs, c) = setup();
        assert_eq!(resolve(&refs, &store, "HEAD~1").unwrap(), c[1]);
        assert_eq!(resolve(&refs, &store, "HEAD~2").unwrap(), c[0]);
        assert_eq!(resolve(&refs, &store, "HEAD^").unwrap(), c[1]);
        assert_eq!(resolve(&refs, &store, "HEAD^^").unwrap(), c[0]);
        assert_eq!(resolve(&refs, &store, "main~1^").unwrap(), c[0]);
        assert!(resolve(&refs, &store, "HEAD~3").is_err());
    }

    /// `^N` selects the Nth parent of a merge.
    #[test]
    fn caret_n_on_merge() {
        let (_d, store, refs, c) = setup();
        let side = make_commit(&store, vec![c[0]], "side");
        let merge = make_commit(&store, vec![c[2], side], "merge");
        refs.update("refs/heads/merged", merge).unwrap();
        assert_eq!(resolve(&refs, &store, "merged^1").unwrap(), c[2]);
        assert_eq!(resolve(&refs, &store, "merged^2").unwrap(), side);
        assert!(resolve(&refs, &store, "merged^3").is_err());
    }

    /// Unambiguous prefixes resolve; short or unknown ones fail.
    #[test]
    fn hex_prefixes() {
        let (_d, store, refs, c) = setup();
        let hex = c[1].to_string();
        assert_eq!(resolve(&refs, &store, &hex[..8]).unwrap(), c[1]);
        assert!(resolve(&refs, &store, &hex[..3]).is_err());
        assert!(resolve(&refs, &store, "deadbeef").is_err());
    }
}
