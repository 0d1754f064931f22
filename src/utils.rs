//! Shared I/O utilities: exact-length reads, hash reads, and a streaming
//! SHA-1 accumulator used while encoding packs and writing loose objects.

use std::{
    io,
    io::{BufRead, Read},
};

use sha1::{Digest, Sha1};

use crate::hash::ObjectHash;

pub fn read_bytes(file: &mut impl Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_sha(file: &mut impl Read) -> io::Result<ObjectHash> {
    ObjectHash::from_stream(file)
}

/// Streaming SHA-1 state used for pack trailers, idx trailers, and the
/// index file checksum. Implements `std::io::Write` so it can sit behind
/// `io::copy` or be updated alongside a real writer.
#[derive(Clone, Default)]
pub struct ObjectHasher {
    inner: Sha1,
}

impl ObjectHasher {
    pub fn new() -> Self {
        Self { inner: Sha1::new() }
    }

    /// Update the hash with data.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> ObjectHash {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(self.inner.finalize().as_ref());
        ObjectHash(bytes)
    }

    /// Digest of the bytes consumed so far without ending the stream.
    pub fn snapshot(&self) -> ObjectHash {
        self.clone().finalize()
    }
}

impl io::Write for ObjectHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A lightweight wrapper that counts bytes consumed from the underlying
/// reader, replacing decompressor-internal counters when slicing a pack
/// stream into per-entry regions.
pub struct CountingReader<R> {
    pub inner: R,
    pub bytes_read: u64,
}

impl<R> CountingReader<R> {
    /// Creates a new `CountingReader` wrapping the given reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
        }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.bytes_read += amt as u64;
        self.inner.consume(amt);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::{CountingReader, ObjectHasher, read_bytes};
    use crate::hash::ObjectHash;

    /// ObjectHasher must agree with the one-shot digest.
    #[test]
    fn hasher_matches_digest() {
        let mut hasher = ObjectHasher::new();
        hasher.update(b"Hello, ");
        hasher.update(b"world!");
        assert_eq!(hasher.finalize(), ObjectHash::new(b"Hello, world!"));
    }

    /// CountingReader tracks consumed byte totals.
    #[test]
    fn counting_reader_counts() {
        let data = b"0123456789";
        let mut reader = CountingReader::new(std::io::Cursor::new(data));
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.bytes_read, 4);
        let rest = read_bytes(&mut reader, 6).unwrap();
        assert_eq!(rest, b"456789");
        assert_eq!(reader.bytes_read, 10);
    }
}
