//! Streaming inflate readers.

pub mod inflate;
