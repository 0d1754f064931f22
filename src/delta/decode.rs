//! Decoder for Git delta instruction streams: rebuilds a target object from
//! its base buffer plus the stream produced by [`super::encode`] (base size,
//! result size, then copy/insert op codes).

use std::io::{ErrorKind, Read};

use super::{read_byte, read_partial_int, read_size_encoding};
use crate::errors::GitError;

const COPY_INSTRUCTION_FLAG: u8 = 1 << 7; // msb set => copy from base, otherwise inline data
const COPY_OFFSET_BYTES: u8 = 4;
const COPY_SIZE_BYTES: u8 = 3;
const COPY_ZERO_SIZE: usize = 0x10000;

/// Apply a delta stream to `base_info`, returning the reconstructed target
/// bytes. The declared base size must match the supplied base, and the
/// result must come out at exactly the declared result size.
pub fn delta_decode(
    mut stream: &mut impl Read,
    base_info: &[u8],
) -> Result<Vec<u8>, GitError> {
    let base_size = read_size_encoding(&mut stream)?;
    if base_info.len() != base_size {
        return Err(GitError::DeltaObjectError(format!(
            "base length {} does not match declared {}",
            base_info.len(),
            base_size
        )));
    }

    let result_size = read_size_encoding(&mut stream)?;
    let mut buffer = Vec::with_capacity(result_size);
    loop {
        // The target is complete when the instruction stream ends.
        let instruction = match read_byte(stream) {
            Ok(instruction) => instruction,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => {
                return Err(GitError::DeltaObjectError(format!(
                    "wrong instruction in delta: {err}"
                )));
            }
        };

        if instruction & COPY_INSTRUCTION_FLAG == 0 {
            // Data instruction; the byte itself is the literal length.
            // Appending 0 bytes doesn't make sense, so git disallows it.
            if instruction == 0 {
                return Err(GitError::DeltaObjectError(
                    "invalid data instruction".to_string(),
                ));
            }
            let mut data = vec![0; instruction as usize];
            stream.read_exact(&mut data)?;
            buffer.extend_from_slice(&data);
        } else {
            // Copy instruction
            let mut nonzero_bytes = instruction;
            let offset = read_partial_int(&mut stream, COPY_OFFSET_BYTES, &mut nonzero_bytes)?;
            let mut size = read_partial_int(&mut stream, COPY_SIZE_BYTES, &mut nonzero_bytes)?;
            if size == 0 {
                // Copying 0 bytes doesn't make sense, so git assumes 64K.
                size = COPY_ZERO_SIZE;
            }
            let base_data = base_info.get(offset..(offset + size)).ok_or_else(|| {
                GitError::DeltaObjectError("copy instruction out of base bounds".to_string())
            })?;
            buffer.extend_from_slice(base_data);
        }
    }

    if buffer.len() != result_size {
        return Err(GitError::DeltaObjectError(format!(
            "result length {} does not match declared {}",
            buffer.len(),
            result_size
        )));
    }
    Ok(buffer)
}
