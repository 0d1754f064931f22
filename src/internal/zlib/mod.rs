//! Zlib streaming support shared by loose object storage and pack decoding.

pub mod stream;
