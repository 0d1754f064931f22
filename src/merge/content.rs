//! Line-level three-way content merge. Both sides' edits against the base
//! are aligned on lines that are stable in all three versions; chunks where
//! only one side changed apply cleanly, identical changes collapse, and
//! genuinely divergent chunks emit `<<<<<<<`/`=======`/`>>>>>>>` markers.

use similar::{Algorithm, DiffOp, capture_diff_slices};

/// Outcome of merging one file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergedContent {
    /// Both sides applied without overlap.
    Clean(Vec<u8>),
    /// Divergent edits; the payload carries conflict markers (or, for
    /// binary files, the `ours` bytes unchanged).
    Conflicted(Vec<u8>),
}

impl MergedContent {
    pub fn bytes(&self) -> &[u8] {
        match self {
            MergedContent::Clean(b) | MergedContent::Conflicted(b) => b,
        }
    }

    pub fn is_conflicted(&self) -> bool {
        matches!(self, MergedContent::Conflicted(_))
    }
}

/// NUL within the sniff window marks a file as binary, like git.
fn is_binary(data: &[u8]) -> bool {
    data.iter().take(8000).any(|b| *b == 0)
}

fn split_lines(data: &str) -> Vec<&str> {
    data.split_inclusive('\n').collect()
}

/// Map each base line to its counterpart line index on one side, using the
/// Equal runs of a Myers diff. `None` marks base lines changed on that side.
fn side_map(base: &[&str], side: &[&str]) -> Vec<Option<usize>> {
    let mut map = vec![None; base.len()];
    for op in capture_diff_slices(Algorithm::Myers, base, side) {
        if let DiffOp::Equal {
            old_index,
            new_index,
            len,
        } = op
        {
            for k in 0..len {
                map[old_index + k] = Some(new_index + k);
            }
        }
    }
    map
}

/// Three-way merge of text or binary content.
pub fn merge_blobs(
    base: &[u8],
    ours: &[u8],
    theirs: &[u8],
    our_label: &str,
    their_label: &str,
) -> MergedContent {
    if ours == theirs {
        return MergedContent::Clean(ours.to_vec());
    }
    if ours == base {
        return MergedContent::Clean(theirs.to_vec());
    }
    if theirs == base {
        return MergedContent::Clean(ours.to_vec());
    }
    if is_binary(base) || is_binary(ours) || is_binary(theirs) {
        return MergedContent::Conflicted(ours.to_vec());
    }

    let (base_s, ours_s, theirs_s) = match (
        std::str::from_utf8(base),
        std::str::from_utf8(ours),
        std::str::from_utf8(theirs),
    ) {
        (Ok(b), Ok(o), Ok(t)) => (b, o, t),
        _ => return MergedContent::Conflicted(ours.to_vec()),
    };

    let base_lines = split_lines(base_s);
    let ours_lines = split_lines(ours_s);
    let theirs_lines = split_lines(theirs_s);
    let ours_map = side_map(&base_lines, &ours_lines);
    let theirs_map = side_map(&base_lines, &theirs_lines);

    let mut out = String::new();
    let mut conflicted = false;
    let (mut i, mut o, mut t) = (0usize, 0usize, 0usize);

    while i < base_lines.len() || o < ours_lines.len() || t < theirs_lines.len() {
        // A line stable on both sides at the current cursors passes through.
        if i < base_lines.len() && ours_map[i] == Some(o) && theirs_map[i] == Some(t) {
            out.push_str(base_lines[i]);
            i += 1;
            o += 1;
            t += 1;
            continue;
        }

        // Otherwise gather the unstable chunk up to the next anchor line
        // that is stable on both sides and not yet passed on either.
        let mut j = i;
        while j < base_lines.len() {
            match (ours_map[j], theirs_map[j]) {
                (Some(om), Some(tm)) if om >= o && tm >= t => break,
                _ => j += 1,
            }
        }
        let (o_end, t_end) = if j < base_lines.len() {
            (
                ours_map[j].expect("anchor is stable"),
                theirs_map[j].expect("anchor is stable"),
            )
        } else {
            (ours_lines.len(), theirs_lines.len())
        };

        let base_chunk = &base_lines[i..j];
        let ours_chunk = &ours_lines[o..o_end];
        let theirs_chunk = &theirs_lines[t..t_end];

        if ours_chunk == theirs_chunk {
            push_chunk(&mut out, ours_chunk);
        } else if ours_chunk == base_chunk {
            push_chunk(&mut out, theirs_chunk);
        } else if theirs_chunk == base_chunk {
            push_chunk(&mut out, ours_chunk);
        } else {
            conflicted = true;
            ensure_newline(&mut out);
            out.push_str(&format!("<<<<<<< {our_label}\n"));
            push_chunk(&mut out, ours_chunk);
            ensure_newline(&mut out);
            out.push_str("=======\n");
            push_chunk(&mut out, theirs_chunk);
            ensure_newline(&mut out);
            out.push_str(&format!(">>>>>>> {their_label}\n"));
        }

        i = j;
        o = o_end;
        t = t_end;
    }

    if conflicted {
        MergedContent::Conflicted(out.into_bytes())
    } else {
        MergedContent::Clean(out.into_bytes())
    }
}

fn push_chunk(out: &mut String, chunk: &[&str]) {
    for line in chunk {
        out.push_str(line);
    }
}

fn ensure_newline(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::{MergedContent, merge_blobs};

    fn merge(base: &str, ours: &str, theirs: &str) -> MergedContent {
        merge_blobs(base.as_bytes(), ours.as_bytes(), theirs.as_bytes(), "HEAD", "feat")
    }

    /// Edits on disjoint lines both apply.
    #[test]
    fn disjoint_edits_merge_clean() {
        let base = "one\ntwo\nthree\nfour\nfive\n";
        let ours = "ONE\ntwo\nthree\nfour\nfive\n";
        let theirs = "one\ntwo\nthree\nfour\nFIVE\n";
        assert_eq!(
            merge(base, ours, theirs),
            MergedContent::Clean(b"ONE\ntwo\nthree\nfour\nFIVE\n".to_vec())
        );
    }

    /// One side unchanged takes the other wholesale.
    #[test]
    fn one_side_unchanged() {
        let base = "a\nb\n";
        let theirs = "a\nb\nc\n";
        assert_eq!(
            merge(base, base, theirs),
            MergedContent::Clean(theirs.as_bytes().to_vec())
        );
        assert_eq!(
            merge(base, theirs, base),
            MergedContent::Clean(theirs.as_bytes().to_vec())
        );
    }

    /// Identical edits on both sides collapse.
    #[test]
    fn identical_edits_collapse() {
        let base = "x\n";
        let both = "y\n";
        assert_eq!(
            merge(base, both, both),
            MergedContent::Clean(both.as_bytes().to_vec())
        );
    }

    /// Divergent edits of the same line produce exactly the marker layout
    /// git writes.
    #[test]
    fn conflicting_edit_markers() {
        let merged = merge("base\n", "ours\n", "theirs\n");
        assert_eq!(
            merged,
            MergedContent::Conflicted(
                b"<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> feat\n".to_vec()
            )
        );
    }

    /// Insertions on one side next to an edit on the other still merge when
    /// they do not overlap.
    #[test]
    fn insert_near_edit() {
        let base = "alpha\nbeta\ngamma\n";
        let ours = "alpha\nbeta\ngamma\ndelta\n"; // append
        let theirs = "ALPHA\nbeta\ngamma\n"; // edit first line
        assert_eq!(
            merge(base, ours, theirs),
            MergedContent::Clean(b"ALPHA\nbeta\ngamma\ndelta\n".to_vec())
        );
    }

    /// Both sides appending different content conflicts.
    #[test]
    fn competing_appends_conflict() {
        let merged = merge("start\n", "start\nours tail\n", "start\ntheirs tail\n");
        match merged {
            MergedContent::Conflicted(bytes) => {
                let text = String::from_utf8(bytes).unwrap();
                assert!(text.starts_with("start\n<<<<<<< HEAD\n"));
                assert!(text.contains("ours tail\n=======\ntheirs tail\n"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    /// Binary content never gets text markers.
    #[test]
    fn binary_conflict_keeps_ours() {
        let base = b"\x00base".to_vec();
        let ours = b"\x00ours".to_vec();
        let theirs = b"\x00theirs".to_vec();
        assert_eq!(
            merge_blobs(&base, &ours, &theirs, "HEAD", "feat"),
            MergedContent::Conflicted(ours)
        );
    }
}
