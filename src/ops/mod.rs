//! History-manipulation operations: reset, and the resumable rebase and
//! bisect state machines whose on-disk JSON documents survive crashes and
//! whose directory presence doubles as the in-progress exclusion signal.

pub mod bisect;
pub mod rebase;
pub mod reset;
