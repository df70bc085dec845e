use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Unique identifier of an entry. Compared by exact byte equality.
pub type Key = Bytes;

/// Opaque payload stored under a [`Key`].
pub type Value = Bytes;

/// A single entry of a keyed dataset.
///
/// Both halves are [`Bytes`], so cloning a pair (for instance to hand a key
/// to a background writer) never copies the payload.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyValue {
    /// The unique identifier of the entry.
    pub key: Key,
    /// The entry's payload.
    pub value: Value,
}

impl KeyValue {
    /// Create a new key-value pair.
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Split the pair into its key and value.
    pub fn into_parts(self) -> (Key, Value) {
        (self.key, self.value)
    }
}

impl fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyValue({:?} = {:?})", self.key, self.value)
    }
}

impl<K: Into<Bytes>, V: Into<Bytes>> From<(K, V)> for KeyValue {
    fn from((key, value): (K, V)) -> Self {
        Self::new(key, value)
    }
}
