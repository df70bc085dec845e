use kvdiff_types::ChangeKind;
use serde::{Deserialize, Serialize};

/// Counts of the changes a diff emitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Number of `Created` changes.
    pub created: u64,
    /// Number of `Modified` changes.
    pub modified: u64,
    /// Number of `Unchanged` changes.
    pub unchanged: u64,
    /// Number of `Deleted` changes.
    pub deleted: u64,
    /// Whether the diff stopped early on cancellation (no sweep ran).
    pub cancelled: bool,
}

impl DiffSummary {
    /// Count one emitted change.
    pub fn record(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::Created => self.created += 1,
            ChangeKind::Modified => self.modified += 1,
            ChangeKind::Unchanged => self.unchanged += 1,
            ChangeKind::Deleted => self.deleted += 1,
        }
    }

    /// Number of changes of the given kind.
    pub fn count(&self, kind: ChangeKind) -> u64 {
        match kind {
            ChangeKind::Created => self.created,
            ChangeKind::Modified => self.modified,
            ChangeKind::Unchanged => self.unchanged,
            ChangeKind::Deleted => self.deleted,
        }
    }

    /// Total number of emitted changes, `Unchanged` included.
    pub fn total(&self) -> u64 {
        self.created + self.modified + self.unchanged + self.deleted
    }

    /// Number of emitted changes that are actual differences.
    pub fn differences(&self) -> u64 {
        self.created + self.modified + self.deleted
    }

    /// Returns `true` if the diff ran to completion without differences.
    pub fn is_in_sync(&self) -> bool {
        !self.cancelled && self.differences() == 0
    }

    pub(crate) fn into_cancelled(mut self) -> Self {
        self.cancelled = true;
        self
    }
}
