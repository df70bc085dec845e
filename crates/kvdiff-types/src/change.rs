use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kv::{Key, Value};

/// Outcome of probing an index with a key-value pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareResult {
    /// The key is not part of the index baseline.
    Missing,
    /// The key is present but its stored value differs from the probe.
    ///
    /// Only returned by indexes that record values.
    Modified,
    /// The key is present and its stored value equals the probe.
    Unchanged,
}

impl fmt::Display for CompareResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Modified => write!(f, "modified"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Kind of difference reported for a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeKind {
    /// The key exists in the reference but not in the current state.
    Created,
    /// The key exists on both sides with different values.
    Modified,
    /// The key exists on both sides with equal values.
    Unchanged,
    /// The key exists in the current state but not in the reference.
    Deleted,
}

impl ChangeKind {
    /// Returns `true` if changes of this kind carry a value.
    pub fn carries_value(&self) -> bool {
        matches!(self, Self::Created | Self::Modified)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Modified => write!(f, "modified"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A typed difference for a single key.
///
/// `value` is `Some` for [`ChangeKind::Created`] and [`ChangeKind::Modified`]
/// (the reference-side value) and `None` otherwise. Use the constructors to
/// keep that invariant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Change {
    /// What happened to the key.
    pub kind: ChangeKind,
    /// The key the change applies to.
    pub key: Key,
    /// The new value, for creations and modifications.
    pub value: Option<Value>,
}

impl Change {
    /// A key present only on the reference side.
    pub fn created(key: Key, value: Value) -> Self {
        Self {
            kind: ChangeKind::Created,
            key,
            value: Some(value),
        }
    }

    /// A key whose reference value differs from the current one.
    pub fn modified(key: Key, value: Value) -> Self {
        Self {
            kind: ChangeKind::Modified,
            key,
            value: Some(value),
        }
    }

    /// A key with equal values on both sides.
    pub fn unchanged(key: Key) -> Self {
        Self {
            kind: ChangeKind::Unchanged,
            key,
            value: None,
        }
    }

    /// A key present only on the current side.
    pub fn deleted(key: Key) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            key,
            value: None,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, String::from_utf8_lossy(&self.key))
    }
}

/// The two roles in a diff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The desired state that the current one is compared against.
    Reference,
    /// The state being checked for drift.
    Current,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Current => write!(f, "current"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn constructors_respect_value_invariant() {
        let key = Bytes::from_static(b"k");
        let value = Bytes::from_static(b"v");

        for change in [
            Change::created(key.clone(), value.clone()),
            Change::modified(key.clone(), value.clone()),
            Change::unchanged(key.clone()),
            Change::deleted(key.clone()),
        ] {
            assert_eq!(change.kind.carries_value(), change.value.is_some());
        }
    }

    #[test]
    fn display_formats() {
        let change = Change::deleted(Bytes::from_static(b"k4"));
        assert_eq!(change.to_string(), "deleted k4");
        assert_eq!(Side::Reference.to_string(), "reference");
        assert_eq!(CompareResult::Modified.to_string(), "modified");
    }
}
