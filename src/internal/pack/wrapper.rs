//! Reader wrapper that tracks how many bytes of a pack have been consumed
//! while keeping a running SHA-1 for trailer verification.

use std::io::{self, BufRead, Read};

use crate::{hash::ObjectHash, utils::ObjectHasher};

/// [`Wrapper`] hashes and counts every byte that passes through it, so the
/// pack decoder knows the current offset and can verify the trailer digest
/// without buffering the stream twice.
pub struct Wrapper<R> {
    inner: R,
    hash: ObjectHasher,
    bytes_read: usize,
}

impl<R> Wrapper<R>
where
    R: BufRead,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hash: ObjectHasher::new(),
            bytes_read: 0,
        }
    }

    /// Number of bytes consumed so far.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Digest of the bytes consumed so far.
    pub fn current_hash(&self) -> ObjectHash {
        self.hash.snapshot()
    }
}

impl<R> BufRead for Wrapper<R>
where
    R: BufRead,
{
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        let buffer = self.inner.fill_buf().expect("fill_buf after a successful fill");
        self.hash.update(&buffer[..amt]);
        self.inner.consume(amt);
        self.bytes_read += amt;
    }
}

impl<R> Read for Wrapper<R>
where
    R: BufRead,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let o = self.inner.read(buf)?;
        self.hash.update(&buf[..o]);
        self.bytes_read += o;
        Ok(o)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor, Read};

    use super::Wrapper;
    use crate::hash::ObjectHash;

    /// Reading through the wrapper yields the data and tracks count + hash.
    #[test]
    fn read_counts_and_hashes() {
        let data = b"Hello, world!";
        let mut wrapper = Wrapper::new(BufReader::new(Cursor::new(data.as_ref())));

        let mut buffer = vec![0; data.len()];
        wrapper.read_exact(&mut buffer).unwrap();

        assert_eq!(buffer, data);
        assert_eq!(wrapper.bytes_read(), data.len());
        assert_eq!(wrapper.current_hash(), ObjectHash::new(data));
    }
}
