//! Buffered inflate reader that decodes Git's zlib-compressed objects while
//! simultaneously tracking the SHA-1 digest of the framed content for
//! integrity verification.

use std::{io, io::BufRead};

use flate2::{Decompress, FlushDecompress, Status};

use crate::{internal::object::types::ObjectType, utils::ObjectHasher};

/// ReadBoxed unzips a DEFLATE stream from a [`BufRead`] source without
/// consuming bytes past the end of the stream, so several compressed
/// regions can follow one another (as they do inside a pack).
pub struct ReadBoxed<R> {
    /// The reader from which bytes should be decompressed.
    pub inner: R,
    /// The decompressor doing all the work.
    pub decompressor: Box<Decompress>,
    /// Whether the digest accumulates while reading.
    count_hash: bool,
    /// The current hash state for the decompressed data, seeded with the
    /// object frame header.
    pub hash: ObjectHasher,
}

impl<R> ReadBoxed<R>
where
    R: BufRead,
{
    /// New a ReadBoxed for a plain base object: the digest is seeded with
    /// the frame header `"<type> <size>\0"` so that after the body has been
    /// read, `hash` finalizes to the object id.
    pub fn new(inner: R, obj_type: ObjectType, size: usize) -> Self {
        let mut hash = ObjectHasher::new();
        hash.update(obj_type.to_bytes());
        hash.update(b" ");
        hash.update(size.to_string().as_bytes());
        hash.update(b"\0");
        ReadBoxed {
            inner,
            hash,
            count_hash: true,
            decompressor: Box::new(Decompress::new(true)),
        }
    }

    /// New a ReadBoxed for a delta object, whose id is not the hash of the
    /// delta stream; no digest is accumulated.
    pub fn new_for_delta(inner: R) -> Self {
        ReadBoxed {
            inner,
            hash: ObjectHasher::new(),
            count_hash: false,
            decompressor: Box::new(Decompress::new(true)),
        }
    }
}

impl<R> io::Read for ReadBoxed<R>
where
    R: BufRead,
{
    fn read(&mut self, into: &mut [u8]) -> io::Result<usize> {
        let o = read(&mut self.inner, &mut self.decompressor, into)?;
        if self.count_hash {
            self.hash.update(&into[..o]);
        }
        Ok(o)
    }
}

/// Read bytes from `rd` and decompress them using `state` into a
/// pre-allocated fitting buffer `dst`, returning the amount of bytes written.
fn read(rd: &mut impl BufRead, state: &mut Decompress, mut dst: &mut [u8]) -> io::Result<usize> {
    let mut total_written = 0;
    loop {
        let (written, consumed, ret, eof);
        {
            let input = rd.fill_buf()?;
            eof = input.is_empty();
            let before_out = state.total_out();
            let before_in = state.total_in();
            let flush = if eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };
            ret = state.decompress(input, dst, flush);
            written = (state.total_out() - before_out) as usize;
            total_written += written;
            dst = &mut dst[written..];
            consumed = (state.total_in() - before_in) as usize;
        }
        rd.consume(consumed);

        match ret {
            // The stream has officially ended, nothing more to do here.
            Ok(Status::StreamEnd) => return Ok(total_written),
            // Either input or output is depleted even though the stream is not done yet.
            Ok(Status::Ok | Status::BufError) if eof || dst.is_empty() => return Ok(total_written),
            // Some progress was made; continue until the stream ends.
            Ok(Status::Ok | Status::BufError) if consumed != 0 || written != 0 => continue,
            // zlib makes no progress but is not done either.
            Ok(Status::Ok | Status::BufError) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "deflate stream stalled",
                ));
            }
            Err(..) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "corrupt deflate stream",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use flate2::{Compression, write::ZlibEncoder};

    use super::*;
    use crate::hash::ObjectHash;

    /// Helper to build zlib-compressed bytes from input data.
    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// ReadBoxed::new should inflate data and accumulate the object id over
    /// the frame header + body.
    #[test]
    fn inflate_object_counts_hash() {
        let body = b"hello\n";
        let compressed = zlib_compress(body);
        let cursor = io::Cursor::new(compressed);

        let mut reader = ReadBoxed::new(cursor, ObjectType::Blob, body.len());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, body);
        assert_eq!(
            reader.hash.finalize(),
            ObjectHash::from_type_and_data(ObjectType::Blob, body)
        );
    }

    /// ReadBoxed::new_for_delta should inflate without touching the digest.
    #[test]
    fn inflate_delta_skips_hash() {
        let body = b"delta bytes";
        let compressed = zlib_compress(body);
        let cursor = io::Cursor::new(compressed);

        let mut reader = ReadBoxed::new_for_delta(cursor);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, body);
        assert_eq!(reader.hash.finalize(), ObjectHash::new(b""));
    }

    /// Trailing bytes after the deflate stream stay in the inner reader.
    #[test]
    fn does_not_consume_past_stream_end() {
        let body = b"first region";
        let mut data = zlib_compress(body);
        data.extend_from_slice(b"TRAILER");
        let cursor = io::Cursor::new(data);

        let mut reader = ReadBoxed::new_for_delta(std::io::BufReader::new(cursor));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, body);

        let mut rest = Vec::new();
        reader.inner.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"TRAILER");
    }

    /// Corrupt deflate stream should surface as InvalidInput.
    #[test]
    fn corrupt_stream_returns_error() {
        let data = b"not a valid zlib stream";
        let mut reader = ReadBoxed::new(io::Cursor::new(&data[..]), ObjectType::Blob, data.len());
        let mut out = [0u8; 16];
        let err = reader.read(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
