//! Pkt-line framing: a 4-hex length prefix covering header plus payload,
//! with the special values `0000` (flush), `0001` (delimiter), and `0002`
//! (response end), plus the side-band-64k demultiplexer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    errors::GitError,
    protocol::types::{PKT_FLUSH, SideBand},
};

/// One parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Flush,
    Delim,
    ResponseEnd,
    Data(Bytes),
}

/// Read one pkt-line from the buffer. `None` when the buffer is exhausted.
pub fn read_pkt_line(bytes: &mut Bytes) -> Result<Option<PktLine>, GitError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    if bytes.len() < 4 {
        return Err(GitError::network("truncated pkt-line length"));
    }

    let prefix = bytes.copy_to_bytes(4);
    let length = std::str::from_utf8(&prefix)
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
        .ok_or_else(|| {
            GitError::network(format!("invalid pkt-line length {prefix:?}"))
        })?;

    match length {
        0 => return Ok(Some(PktLine::Flush)),
        1 => return Ok(Some(PktLine::Delim)),
        2 => return Ok(Some(PktLine::ResponseEnd)),
        3 => return Err(GitError::network("invalid pkt-line length 3")),
        _ => {}
    }
    let data_length = length - 4;
    if bytes.len() < data_length {
        return Err(GitError::network(format!(
            "pkt-line declares {data_length} bytes, {} available",
            bytes.len()
        )));
    }
    Ok(Some(PktLine::Data(bytes.copy_to_bytes(data_length))))
}

/// Frame a payload as one pkt-line.
pub fn write_pkt_line(buf: &mut BytesMut, payload: &[u8]) {
    buf.put(format!("{:04x}", payload.len() + 4).as_bytes());
    buf.put(payload);
}

/// Frame a string payload as one pkt-line.
pub fn add_pkt_line_string(buf: &mut BytesMut, payload: String) {
    write_pkt_line(buf, payload.as_bytes());
}

/// Append a flush packet.
pub fn write_flush(buf: &mut BytesMut) {
    buf.put(&PKT_FLUSH[..]);
}

/// Read up to the next whitespace or NUL, consuming the separator.
pub fn read_until_white_space(bytes: &mut Bytes) -> String {
    let mut buf = Vec::new();
    while bytes.has_remaining() {
        let c = bytes.get_u8();
        if c.is_ascii_whitespace() || c == 0 {
            break;
        }
        buf.push(c);
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Demultiplex a side-band-64k body: channel 1 accumulates into the pack
/// buffer, channel 2 is forwarded to the progress callback, channel 3
/// fails the transfer. Non-sideband text frames (ACK/NAK/shallow lines)
/// are skipped. Stops at the end of the buffer or a response-end packet.
pub fn demux_sideband(
    mut body: Bytes,
    sideband: bool,
    progress: &mut dyn FnMut(&str),
) -> Result<Vec<u8>, GitError> {
    let mut pack = Vec::new();
    while let Some(pkt) = read_pkt_line(&mut body)? {
        let data = match pkt {
            PktLine::Data(data) => data,
            PktLine::Flush | PktLine::Delim => continue,
            PktLine::ResponseEnd => break,
        };
        if data.is_empty() {
            continue;
        }
        if !sideband {
            // Without sideband the stream interleaves status lines and raw
            // pack bytes; anything that is not a known status line is pack.
            if data.starts_with(b"ACK") || data.starts_with(b"NAK") {
                continue;
            }
            pack.extend_from_slice(&data);
            continue;
        }
        match SideBand::from_value(data[0]) {
            Some(SideBand::PackfileData) => pack.extend_from_slice(&data[1..]),
            Some(SideBand::ProgressInfo) => {
                progress(String::from_utf8_lossy(&data[1..]).trim_end())
            }
            Some(SideBand::Error) => {
                return Err(GitError::network(format!(
                    "remote error: {}",
                    String::from_utf8_lossy(&data[1..]).trim_end()
                )));
            }
            None => {
                // Negotiation lines (ACK/NAK) precede the sideband stream.
                if data.starts_with(b"ACK") || data.starts_with(b"NAK") || data.starts_with(b"shallow")
                    || data.starts_with(b"unshallow")
                {
                    continue;
                }
                return Err(GitError::network(format!(
                    "unexpected sideband channel {}",
                    data[0]
                )));
            }
        }
    }
    Ok(pack)
}
