//! SHA-1 object identities. Every stored object is addressed by the digest
//! of its framed form `"<type> <size>\0<content>"`; this module carries the
//! hash value type plus conversion helpers for hex, raw bytes, and streams.

use std::{fmt::Display, io, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sha1::{Digest, Sha1};

use crate::{errors::GitError, internal::object::types::ObjectType};

/// A 20-byte SHA-1 object id.
///
/// Supports conversion to/from hex strings, byte slices, and stream reading.
/// Ordering is byte-wise, which matches the sorted hash table of pack
/// index files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectHash(pub [u8; 20]);

impl Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ObjectHash {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Parse a 40-char hex string into an `ObjectHash`.
impl FromStr for ObjectHash {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::HEX_LEN {
            return Err(GitError::InvalidHashValue(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| GitError::InvalidHashValue(s.to_string()))?;
        let mut h = [0u8; 20];
        h.copy_from_slice(&bytes);
        Ok(ObjectHash(h))
    }
}

impl ObjectHash {
    /// Byte length of the digest.
    pub const SIZE: usize = 20;
    /// Hex string length of the digest.
    pub const HEX_LEN: usize = 40;

    /// The all-zero id used on the wire for "no object" (ref creation and
    /// deletion commands).
    pub const fn zero() -> ObjectHash {
        ObjectHash([0u8; 20])
    }

    /// Whether this is the all-zero id.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Compute the SHA-1 of raw data.
    pub fn new(data: &[u8]) -> ObjectHash {
        let digest = Sha1::digest(data);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(digest.as_ref());
        ObjectHash(bytes)
    }

    /// Compute the object id from type and content by hashing the framed
    /// form `"<type> <size>\0<content>"`.
    pub fn from_type_and_data(object_type: ObjectType, data: &[u8]) -> ObjectHash {
        let mut hasher = Sha1::new();
        hasher.update(object_type.to_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update(b"\x00");
        hasher.update(data);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(hasher.finalize().as_ref());
        ObjectHash(bytes)
    }

    /// Create an `ObjectHash` from exactly 20 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<ObjectHash, GitError> {
        if bytes.len() != Self::SIZE {
            return Err(GitError::InvalidHashValue(hex::encode(bytes)));
        }
        let mut h = [0u8; 20];
        h.copy_from_slice(bytes);
        Ok(ObjectHash(h))
    }

    /// Read 20 raw hash bytes from a stream.
    pub fn from_stream(data: &mut impl io::Read) -> io::Result<ObjectHash> {
        let mut h = [0u8; 20];
        data.read_exact(&mut h)?;
        Ok(ObjectHash(h))
    }

    /// Return the raw bytes of the hash.
    pub fn to_data(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

/// Hashes serialize as hex strings so the JSON state documents
/// (rebase/bisect sessions, journal) stay human-readable.
impl Serialize for ObjectHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ObjectHash::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::ObjectHash;
    use crate::internal::object::types::ObjectType;

    /// Hashing "Hello, world!" should match the known SHA-1 value.
    #[test]
    fn test_sha1_new() {
        let data = "Hello, world!".as_bytes();
        let sha1 = ObjectHash::new(data);
        assert_eq!(sha1.to_string(), "943a702d06f34599aee1f8da8ef9f7296031d699");
    }

    /// Framed hashing must match `git hash-object` for a known blob.
    #[test]
    fn test_framed_blob_hash() {
        // printf 'hello\n' | git hash-object --stdin
        let hash = ObjectHash::from_type_and_data(ObjectType::Blob, b"hello\n");
        assert_eq!(hash.to_string(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    /// Construct from raw bytes and round-trip through hex.
    #[test]
    fn test_from_bytes_round_trip() {
        let hash = ObjectHash::from_bytes(&[
            0x8a, 0xb6, 0x86, 0xea, 0xfe, 0xb1, 0xf4, 0x47, 0x02, 0x73, 0x8c, 0x8b, 0x0f, 0x24,
            0xf2, 0x56, 0x7c, 0x36, 0xda, 0x6d,
        ])
        .unwrap();
        assert_eq!(hash.to_string(), "8ab686eafeb1f44702738c8b0f24f2567c36da6d");
        assert_eq!(
            ObjectHash::from_str("8ab686eafeb1f44702738c8b0f24f2567c36da6d").unwrap(),
            hash
        );
    }

    /// Wrong lengths are rejected for both hex and raw forms.
    #[test]
    fn test_invalid_lengths() {
        assert!(ObjectHash::from_str("abc123").is_err());
        assert!(ObjectHash::from_bytes(&[0u8; 19]).is_err());
    }

    /// Read hash bytes from a stream.
    #[test]
    fn test_from_stream() {
        let source = [
            0x8a, 0xb6, 0x86, 0xea, 0xfe, 0xb1, 0xf4, 0x47, 0x02, 0x73, 0x8c, 0x8b, 0x0f, 0x24,
            0xf2, 0x56, 0x7c, 0x36, 0xda, 0x6d,
        ];
        let mut reader = std::io::Cursor::new(source);
        let sha1 = ObjectHash::from_stream(&mut reader).unwrap();
        assert_eq!(sha1.to_string(), "8ab686eafeb1f44702738c8b0f24f2567c36da6d");
    }

    /// The zero id is recognized and prints forty zeros.
    #[test]
    fn test_zero() {
        let zero = ObjectHash::zero();
        assert!(zero.is_zero());
        assert_eq!(zero.to_string(), "0".repeat(40));
    }

    /// JSON serialization uses hex strings.
    #[test]
    fn test_serde_hex() {
        let hash = ObjectHash::from_str("ce013625030ba8dba906f756967f9e9ca394464a").unwrap();
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, "\"ce013625030ba8dba906f756967f9e9ca394464a\"");
        let back: ObjectHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
