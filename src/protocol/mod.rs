//! Git smart-protocol v1 support: pkt-line framing, ref advertisement
//! parsing, capability types, and the blocking smart HTTP client used for
//! fetch and push.

pub mod advertisement;
pub mod client;
pub mod pkt;
pub mod types;

pub use advertisement::RefAdvertisement;
pub use client::{Credential, HttpClient};
pub use types::*;
