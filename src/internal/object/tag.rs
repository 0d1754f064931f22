//! The annotated Tag object: a named, messaged pointer at another object
//! (almost always a commit). Lightweight tags are just refs and never
//! materialize as objects.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{
        ObjectTrait,
        signature::{Signature, SignatureKind},
        types::ObjectType,
    },
};

/// Serialized as
/// `object <h>\ntype <t>\ntag <name>\ntagger ...\n\n<message>`.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: ObjectHash,
    pub object_hash: ObjectHash,
    pub object_type: ObjectType,
    pub tag_name: String,
    pub tagger: Signature,
    pub message: String,
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "object {}", self.object_hash)?;
        writeln!(f, "type {}", self.object_type)?;
        writeln!(f, "tag {}", self.tag_name)?;
        writeln!(f, "{}", self.tagger)?;
        writeln!(f, "{}", self.message)
    }
}

impl Tag {
    /// Build an annotated tag and compute its id.
    pub fn new(
        object_hash: ObjectHash,
        object_type: ObjectType,
        tag_name: String,
        tagger: Signature,
        message: &str,
    ) -> Tag {
        debug_assert_eq!(tagger.kind, SignatureKind::Tagger);
        let mut tag = Tag {
            id: ObjectHash::default(),
            object_hash,
            object_type,
            tag_name,
            tagger,
            message: message.to_string(),
        };
        let data = tag.to_data().expect("tag serialization is infallible");
        tag.id = ObjectHash::from_type_and_data(ObjectType::Tag, &data);
        tag
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        let invalid = |what: &str| GitError::MalformedObject(format!("tag: {what}"));

        let mut rest = data;
        let mut take_line = |prefix: &[u8]| -> Result<Vec<u8>, GitError> {
            if !rest.starts_with(prefix) {
                return Err(invalid("missing header"));
            }
            let line_end = rest.find_byte(b'\n').ok_or_else(|| invalid("truncated"))?;
            let value = rest[prefix.len()..line_end].to_vec();
            rest = &rest[line_end + 1..];
            Ok(value)
        };

        let object_hash = ObjectHash::from_str(
            std::str::from_utf8(&take_line(b"object ")?).map_err(|_| invalid("object id"))?,
        )?;
        let type_raw = take_line(b"type ")?;
        let object_type =
            ObjectType::from_string(std::str::from_utf8(&type_raw).map_err(|_| invalid("type"))?)?;
        let tag_name = String::from_utf8_lossy(&take_line(b"tag ")?).to_string();

        let line_end = rest.find_byte(b'\n').ok_or_else(|| invalid("truncated"))?;
        let tagger = Signature::from_data(rest[..line_end].to_vec())?;
        let message = String::from_utf8_lossy(&rest[line_end + 1..]).to_string();

        Ok(Tag {
            id: hash,
            object_hash,
            object_type,
            tag_name,
            tagger,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn get_size(&self) -> usize {
        0
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        data.extend(b"object ");
        data.extend(self.object_hash.to_string().as_bytes());
        data.push(0x0a);
        data.extend(b"type ");
        data.extend(self.object_type.to_string().as_bytes());
        data.push(0x0a);
        data.extend(b"tag ");
        data.extend(self.tag_name.as_bytes());
        data.push(0x0a);
        data.extend(self.tagger.to_data()?);
        data.push(0x0a);
        data.extend(self.message.as_bytes());
        Ok(data)
    }
}
