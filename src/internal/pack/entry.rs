//! Lightweight representation of one decoded object flowing through the
//! pack codec, with conversions from the strongly typed object structs.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::{
    hash::ObjectHash,
    internal::object::{
        ObjectTrait, blob::Blob, commit::Commit, tag::Tag, tree::Tree, types::ObjectType,
    },
};

/// Git object data as carried by a pack stream: resolved type, body bytes,
/// and the object id of the body.
#[derive(Eq, Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
    pub hash: ObjectHash,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.obj_type == other.obj_type && self.hash == other.hash
    }
}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.obj_type.hash(state);
        self.hash.hash(state);
    }
}

impl Entry {
    /// Wrap raw type + body bytes, computing the id.
    pub fn new(obj_type: ObjectType, data: Vec<u8>) -> Entry {
        let hash = ObjectHash::from_type_and_data(obj_type, &data);
        Entry {
            obj_type,
            data,
            hash,
        }
    }
}

impl From<Blob> for Entry {
    fn from(value: Blob) -> Self {
        Self {
            obj_type: ObjectType::Blob,
            hash: value.id,
            data: value.data,
        }
    }
}

impl From<Commit> for Entry {
    fn from(value: Commit) -> Self {
        Self {
            obj_type: ObjectType::Commit,
            data: value.to_data().expect("commit serialization is infallible"),
            hash: value.id,
        }
    }
}

impl From<Tree> for Entry {
    fn from(value: Tree) -> Self {
        Self {
            obj_type: ObjectType::Tree,
            data: value.to_data().expect("tree serialization is infallible"),
            hash: value.id,
        }
    }
}

impl From<Tag> for Entry {
    fn from(value: Tag) -> Self {
        Self {
            obj_type: ObjectType::Tag,
            data: value.to_data().expect("tag serialization is infallible"),
            hash: value.id,
        }
    }
}
