//! Author/committer/tagger identity lines as they appear inside commit and
//! tag objects: `<kind> <name> <email> <unix-seconds> <tz-offset>`.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Which identity line a signature belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    Author,
    Committer,
    Tagger,
}

impl Display for SignatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SignatureKind::Author => write!(f, "author"),
            SignatureKind::Committer => write!(f, "committer"),
            SignatureKind::Tagger => write!(f, "tagger"),
        }
    }
}

impl FromStr for SignatureKind {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "author" => Ok(SignatureKind::Author),
            "committer" => Ok(SignatureKind::Committer),
            "tagger" => Ok(SignatureKind::Tagger),
            _ => Err(GitError::InvalidSignature(s.to_string())),
        }
    }
}

/// One identity line: name, email, timestamp in unix seconds, and a
/// timezone offset such as `+0530`. The trailing newline of the serialized
/// form belongs to the surrounding object, not the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub kind: SignatureKind,
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    pub timezone: String,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} <{}> {} {}",
            self.kind, self.name, self.email, self.timestamp, self.timezone
        )
    }
}

impl Signature {
    /// Build a signature with an explicit timestamp and timezone.
    pub fn new_at(
        kind: SignatureKind,
        name: String,
        email: String,
        timestamp: i64,
        timezone: String,
    ) -> Signature {
        Signature {
            kind,
            name,
            email,
            timestamp,
            timezone,
        }
    }

    /// Build a signature stamped with the current local time.
    pub fn new(kind: SignatureKind, name: String, email: String) -> Signature {
        let now = chrono::Local::now();
        Signature {
            kind,
            name,
            email,
            timestamp: now.timestamp(),
            timezone: now.format("%z").to_string(),
        }
    }

    /// Parse one identity line, e.g.
    /// `author A U Thor <author@example.com> 1700000000 +0000`.
    pub fn from_data(data: Vec<u8>) -> Result<Signature, GitError> {
        let line = data.as_slice();
        let invalid = || GitError::InvalidSignature(String::from_utf8_lossy(line).to_string());

        let kind_end = line.find_byte(b' ').ok_or_else(invalid)?;
        let kind = std::str::from_utf8(&line[..kind_end])
            .map_err(|_| invalid())?
            .parse::<SignatureKind>()?;

        let email_open = line.find_byte(b'<').ok_or_else(invalid)?;
        let email_close = line.find_byte(b'>').ok_or_else(invalid)?;
        if email_open < kind_end + 1 || email_close < email_open {
            return Err(invalid());
        }

        // The name may be empty; the space before '<' is optional then.
        let name_raw = &line[kind_end + 1..email_open];
        let name = String::from_utf8_lossy(name_raw).trim_end().to_string();
        let email = String::from_utf8_lossy(&line[email_open + 1..email_close]).to_string();

        let rest = line
            .get(email_close + 2..)
            .ok_or_else(invalid)?
            .to_str()
            .map_err(|_| invalid())?;
        let mut parts = rest.split_whitespace();
        let timestamp = parts
            .next()
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or_else(invalid)?;
        let timezone = parts.next().unwrap_or("+0000").to_string();

        Ok(Signature {
            kind,
            name,
            email,
            timestamp,
            timezone,
        })
    }

    /// Serialize back to the identity line (no trailing newline).
    pub fn to_data(&self) -> Result<Vec<u8>, GitError> {
        Ok(self.to_string().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::{Signature, SignatureKind};

    /// A standard author line parses into its fields.
    #[test]
    fn parse_author_line() {
        let sig = Signature::from_data(
            b"author A U Thor <author@example.com> 1700000000 +0530".to_vec(),
        )
        .unwrap();
        assert_eq!(sig.kind, SignatureKind::Author);
        assert_eq!(sig.name, "A U Thor");
        assert_eq!(sig.email, "author@example.com");
        assert_eq!(sig.timestamp, 1700000000);
        assert_eq!(sig.timezone, "+0530");
    }

    /// Serialization round-trips byte-for-byte.
    #[test]
    fn round_trip() {
        let raw = b"committer benjamin.747 <benjamin.747@outlook.com> 1757491219 +0800".to_vec();
        let sig = Signature::from_data(raw.clone()).unwrap();
        assert_eq!(sig.to_data().unwrap(), raw);
    }

    /// Garbage input is rejected rather than panicking.
    #[test]
    fn rejects_malformed() {
        assert!(Signature::from_data(b"author no email here".to_vec()).is_err());
        assert!(Signature::from_data(b"gardener A <a@x> 1 +0000".to_vec()).is_err());
    }

    /// Empty names are accepted (git allows them in old history).
    #[test]
    fn empty_name_parses() {
        let sig = Signature::from_data(b"committer <a@x> 12345 +0000".to_vec()).unwrap();
        assert_eq!(sig.name, "");
        assert_eq!(sig.email, "a@x");
    }
}
