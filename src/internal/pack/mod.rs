//! Pack file encoder/decoder and the `.idx` builder/reader, faithfully
//! following the [pack-format spec](https://git-scm.com/docs/pack-format).

pub mod decode;
pub mod encode;
pub mod entry;
pub mod pack_index;
pub mod wrapper;

pub use decode::{DecodedPack, Pack, PackedEntry};
pub use encode::PackEncoder;
pub use entry::Entry;
pub use pack_index::{IdxBuilder, IdxEntry, PackIndex};
