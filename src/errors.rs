//! Error types for the rsgit core.
//!
//! This module defines the unified error enumeration surfaced by every
//! boundary function in the library: object parsing, the object database,
//! refs, the index, merges and history rewriting, pack encoding/decoding,
//! and the smart HTTP transport. It integrates with `thiserror` to provide
//! `Display` implementations and error source chaining where applicable.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the rsgit library.
///
/// Callers translate these variants into exit codes or user messages; the
/// core never auto-recovers semantic conflicts.
pub enum GitError {
    /// No repository root found walking upward from the given directory.
    #[error("not a repository (or any parent up to filesystem root): {0}")]
    NotARepository(PathBuf),

    /// Object missing from loose and packed storage.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Invalid or unsupported git object type name.
    #[error("the `{0}` is not a valid git object type")]
    InvalidObjectType(String),

    /// Object frame or body failed to parse, or declared size mismatched.
    #[error("malformed object: {0}")]
    MalformedObject(String),

    /// Invalid tree entry (mode/name/hash).
    #[error("the `{0}` is not a valid git tree item")]
    InvalidTreeItem(String),

    /// Malformed author/committer/tagger line.
    #[error("the `{0}` is not a valid signature")]
    InvalidSignature(String),

    /// Malformed or unsupported pack file.
    #[error("malformed pack: {0}")]
    MalformedPack(String),

    /// Computed checksum differs from the recorded one.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    BadChecksum { expected: String, actual: String },

    /// Delta stream could not be applied to its base.
    #[error("delta object error: {0}")]
    DeltaObjectError(String),

    /// Malformed or unsupported index (staging area) file.
    #[error("the `{0}` is not a valid index file")]
    InvalidIndexFile(String),

    /// Reference does not exist.
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// Compare-and-swap ref update saw a different current value.
    #[error("reference `{name}` is stale: expected {expected}, actual {actual}")]
    RefStale {
        name: String,
        expected: String,
        actual: String,
    },

    /// Revision expression could not be parsed or resolved.
    #[error("invalid revision: {0}")]
    InvalidRevision(String),

    /// Operation refused because it would lose local modifications.
    #[error("uncommitted changes would be overwritten: {0}")]
    UncommittedChanges(String),

    /// Staging area holds nothing to commit.
    #[error("nothing to commit")]
    NothingToCommit,

    /// History is empty and the operation requires at least one commit.
    #[error("no commits yet")]
    NoCommitsYet,

    /// Three-way merge or patch application produced conflicts.
    #[error("merge conflicts in: {}", .0.join(", "))]
    MergeConflict(Vec<String>),

    /// A rebase/merge/bisect is already active in this repository.
    #[error("{0} in progress; resolve or abort it first")]
    OperationInProgress(String),

    /// Operation requires HEAD to be on a branch.
    #[error("HEAD is detached")]
    DetachedHead,

    /// Invalid SHA-1 hash formatting or value.
    #[error("the `{0}` is not a valid hash value")]
    InvalidHashValue(String),

    /// Malformed configuration file or value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed refspec.
    #[error("invalid refspec: {0}")]
    InvalidRefspec(String),

    /// I/O error from the underlying reader, writer, or filesystem.
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),

    /// HTTP or transport failure; carries the status code when one exists.
    #[error("network error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    NetworkError {
        status: Option<u16>,
        message: String,
    },

    /// Server demanded credentials and none were available.
    #[error("authentication required")]
    AuthRequired,

    /// Supplied credentials were rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Ref update rejected because it is not a fast-forward.
    #[error("not a fast-forward: {0}")]
    NotFastForward(String),

    /// Generic custom error for miscellaneous failures.
    #[error("{0}")]
    CustomError(String),
}

impl GitError {
    /// Build a `NetworkError` without an HTTP status.
    pub fn network(message: impl Into<String>) -> Self {
        GitError::NetworkError {
            status: None,
            message: message.into(),
        }
    }
}
