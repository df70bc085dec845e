use std::sync::Arc;

use async_trait::async_trait;
use kvdiff_types::{CompareResult, Key, KeyValue, Side, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, IndexResult};
use crate::feed::Feed;

/// An index over one side of a diff.
///
/// An index owns a *baseline* (a key to value mapping with unique keys) and,
/// for the lifetime of one session, a set of *seen* markers over that
/// baseline. All implementations must satisfy these invariants:
/// - `index` never marks anything seen; ingestion and comparison are independent.
/// - `compare` marks a key seen exactly when it reports the key present.
/// - `keys_not_seen` observes every mark of a `compare` call that returned
///   before it was invoked.
/// - An index that does not record values never reports
///   [`CompareResult::Modified`].
/// - `close` is safe to call after any sequence of operations, including
///   none, and leaves the baseline intact.
///
/// Methods take `&self`, so ingestion and comparison may run concurrently
/// within a session.
#[async_trait]
pub trait Index: Send + Sync {
    /// Merge every pair of `values` into the baseline (insert-or-overwrite).
    ///
    /// If `cancel` fires, ingestion stops at the next item boundary and
    /// returns `Ok`, keeping what was already merged.
    async fn index(
        &self,
        values: Feed<KeyValue>,
        cancel: Option<&CancellationToken>,
    ) -> IndexResult<()>;

    /// Look `kv.key` up in the baseline, marking it seen if present.
    async fn compare(&self, kv: &KeyValue) -> IndexResult<CompareResult>;

    /// Whether [`keys_not_seen`](Self::keys_not_seen) is available.
    ///
    /// Implementations that override `keys_not_seen` must override this too.
    fn supports_keys_not_seen(&self) -> bool {
        false
    }

    /// Baseline keys never marked seen in the current session.
    async fn keys_not_seen(&self) -> IndexResult<Feed<Key>> {
        Err(IndexError::Unsupported("keys_not_seen"))
    }

    /// The stored value for `key`.
    ///
    /// Returns `Ok(None)` if the key is unknown or values are not recorded.
    async fn value(&self, key: &[u8]) -> IndexResult<Option<Value>>;

    /// Every pair of the baseline.
    ///
    /// Values are empty when the index does not record them.
    async fn key_values(&self) -> IndexResult<Feed<KeyValue>>;

    /// Whether the index retains values, not just keys.
    fn records_values(&self) -> bool;

    /// End the session.
    async fn close(&self) -> IndexResult<()> {
        Ok(())
    }
}

/// Creates fresh, empty indexes.
#[async_trait]
pub trait IndexFactory: Send + Sync {
    /// Create an empty index for `side`.
    async fn create(&self, side: Side, records_values: bool) -> IndexResult<Arc<dyn Index>>;
}
