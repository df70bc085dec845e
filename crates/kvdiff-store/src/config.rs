use serde::{Deserialize, Serialize};

/// Tuning for a [`PersistentIndex`](crate::PersistentIndex) session.
///
/// Missing fields fall back to their defaults when deserializing, so a
/// partial TOML or JSON table is enough.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentIndexConfig {
    /// Maximum pairs per ingestion transaction, and maximum seen markers
    /// per writer commit.
    pub batch_size: usize,
    /// Capacity of the seen writer's mailbox. Comparisons wait when it is full.
    pub mailbox_capacity: usize,
    /// Channel capacity for scans (`keys_not_seen`, `key_values`).
    pub scan_buffer: usize,
}

impl Default for PersistentIndexConfig {
    fn default() -> Self {
        Self {
            batch_size: 1024,
            mailbox_capacity: 4096,
            scan_buffer: 256,
        }
    }
}
