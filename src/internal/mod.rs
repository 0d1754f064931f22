//! Internal codec layers: the object model, pack file machinery, and the
//! zlib streaming readers they share.

pub mod object;
pub mod pack;
pub mod zlib;
