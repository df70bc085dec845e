//! Process-local index.
//!
//! One [`MemoryIndex`] instance is one session for its whole life: the seen
//! set starts empty on construction and is never reset.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use kvdiff_types::{CompareResult, Key, KeyValue, Side, Value};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{IndexError, IndexResult};
use crate::feed::Feed;
use crate::traits::{Index, IndexFactory};

/// `HashMap`-backed index.
///
/// When values are not recorded the baseline maps every key to an empty
/// value, which is never used for equality.
pub struct MemoryIndex {
    records_values: bool,
    tracks_seen: bool,
    baseline: RwLock<HashMap<Key, Value>>,
    seen: Mutex<HashSet<Key>>,
}

impl MemoryIndex {
    /// Create a new empty index.
    pub fn new(records_values: bool) -> Self {
        Self {
            records_values,
            tracks_seen: true,
            baseline: RwLock::new(HashMap::new()),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Enable or disable seen tracking.
    ///
    /// Without it the index does not support `keys_not_seen`, and a diff
    /// against it reports no deletions.
    pub fn with_seen_tracking(mut self, enabled: bool) -> Self {
        self.tracks_seen = enabled;
        self
    }

    /// Merge a single pair into the baseline.
    pub fn insert(&self, kv: KeyValue) {
        let (key, value) = kv.into_parts();
        let value = if self.records_values { value } else { Bytes::new() };
        self.baseline
            .write()
            .expect("baseline lock poisoned")
            .insert(key, value);
    }

    /// Number of keys in the baseline.
    pub fn len(&self) -> usize {
        self.baseline.read().expect("baseline lock poisoned").len()
    }

    /// Returns `true` if the baseline is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys marked seen so far.
    pub fn seen_count(&self) -> usize {
        self.seen.lock().expect("seen lock poisoned").len()
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for MemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIndex")
            .field("records_values", &self.records_values)
            .field("tracks_seen", &self.tracks_seen)
            .field("entries", &self.len())
            .field("seen", &self.seen_count())
            .finish()
    }
}

#[async_trait]
impl Index for MemoryIndex {
    async fn index(
        &self,
        mut values: Feed<KeyValue>,
        cancel: Option<&CancellationToken>,
    ) -> IndexResult<()> {
        let mut count = 0usize;
        while !cancel.is_some_and(|c| c.is_cancelled()) {
            let Some(kv) = values.next().await else {
                break;
            };
            self.insert(kv);
            count += 1;
        }
        trace!(count, "memory index ingested");
        values.finish().await
    }

    async fn compare(&self, kv: &KeyValue) -> IndexResult<CompareResult> {
        let result = {
            let baseline = self.baseline.read().expect("baseline lock poisoned");
            match baseline.get(&kv.key) {
                None => return Ok(CompareResult::Missing),
                Some(stored) if self.records_values && *stored != kv.value => {
                    CompareResult::Modified
                }
                Some(_) => CompareResult::Unchanged,
            }
        };

        if self.tracks_seen {
            self.seen
                .lock()
                .expect("seen lock poisoned")
                .insert(kv.key.clone());
        }
        Ok(result)
    }

    fn supports_keys_not_seen(&self) -> bool {
        self.tracks_seen
    }

    async fn keys_not_seen(&self) -> IndexResult<Feed<Key>> {
        if !self.tracks_seen {
            return Err(IndexError::Unsupported("keys_not_seen"));
        }

        let baseline = self.baseline.read().expect("baseline lock poisoned");
        let seen = self.seen.lock().expect("seen lock poisoned");
        let unseen: Vec<Key> = baseline
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        Ok(Feed::buffered(unseen))
    }

    async fn value(&self, key: &[u8]) -> IndexResult<Option<Value>> {
        if !self.records_values {
            return Ok(None);
        }
        let baseline = self.baseline.read().expect("baseline lock poisoned");
        Ok(baseline.get(key).cloned())
    }

    async fn key_values(&self) -> IndexResult<Feed<KeyValue>> {
        let baseline = self.baseline.read().expect("baseline lock poisoned");
        let pairs: Vec<KeyValue> = baseline
            .iter()
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
            .collect();
        Ok(Feed::buffered(pairs))
    }

    fn records_values(&self) -> bool {
        self.records_values
    }
}

/// Creates a fresh [`MemoryIndex`] per request.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryIndexFactory;

#[async_trait]
impl IndexFactory for MemoryIndexFactory {
    async fn create(&self, _side: Side, records_values: bool) -> IndexResult<Arc<dyn Index>> {
        Ok(Arc::new(MemoryIndex::new(records_values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn kv(key: &'static str, value: &'static str) -> KeyValue {
        KeyValue::new(key, value)
    }

    async fn index_of(records_values: bool, pairs: Vec<KeyValue>) -> MemoryIndex {
        let idx = MemoryIndex::new(records_values);
        idx.index(pairs.into(), None).await.unwrap();
        idx
    }

    async fn unseen(idx: &MemoryIndex) -> Vec<Key> {
        let mut keys = idx.keys_not_seen().await.unwrap().collect().await.unwrap();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn index_merges_and_overwrites() {
        let idx = index_of(true, vec![kv("a", "1"), kv("b", "2"), kv("a", "3")]).await;
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.value(b"a").await.unwrap(), Some(Bytes::from_static(b"3")));
    }

    #[tokio::test]
    async fn index_from_channel() {
        let (tx, rx) = mpsc::channel(2);
        tokio::spawn(async move {
            for pair in [kv("x", "1"), kv("y", "2"), kv("z", "3")] {
                tx.send(pair).await.unwrap();
            }
        });

        let idx = MemoryIndex::new(true);
        idx.index(rx.into(), None).await.unwrap();
        assert_eq!(idx.len(), 3);
    }

    #[tokio::test]
    async fn index_of_closed_feed_is_noop() {
        let idx = index_of(true, Vec::new()).await;
        assert!(idx.is_empty());
    }

    #[tokio::test]
    async fn cancelled_ingestion_stops_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let idx = MemoryIndex::new(true);
        idx.index(vec![kv("a", "1")].into(), Some(&cancel))
            .await
            .unwrap();
        assert!(idx.is_empty());
    }

    #[tokio::test]
    async fn compare_results() {
        let idx = index_of(true, vec![kv("a", "1"), kv("b", "2")]).await;
        assert_eq!(idx.compare(&kv("a", "1")).await.unwrap(), CompareResult::Unchanged);
        assert_eq!(idx.compare(&kv("b", "x")).await.unwrap(), CompareResult::Modified);
        assert_eq!(idx.compare(&kv("c", "3")).await.unwrap(), CompareResult::Missing);
    }

    #[tokio::test]
    async fn keys_only_index_never_reports_modified() {
        let idx = index_of(false, vec![kv("a", "1")]).await;
        assert_eq!(idx.compare(&kv("a", "other")).await.unwrap(), CompareResult::Unchanged);
        assert_eq!(idx.value(b"a").await.unwrap(), None);
        assert!(!idx.records_values());
    }

    #[tokio::test]
    async fn keys_not_seen_before_and_after_compare() {
        let idx = index_of(true, vec![kv("a", "1"), kv("b", "2")]).await;
        assert_eq!(unseen(&idx).await, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);

        idx.compare(&kv("a", "changed")).await.unwrap();
        idx.compare(&kv("missing", "1")).await.unwrap();
        assert_eq!(unseen(&idx).await, vec![Bytes::from_static(b"b")]);
        assert_eq!(idx.seen_count(), 1);

        idx.compare(&kv("b", "2")).await.unwrap();
        assert!(unseen(&idx).await.is_empty());
    }

    #[tokio::test]
    async fn untracked_index_does_not_support_keys_not_seen() {
        let idx = MemoryIndex::new(true).with_seen_tracking(false);
        idx.insert(kv("a", "1"));
        idx.compare(&kv("a", "1")).await.unwrap();

        assert!(!idx.supports_keys_not_seen());
        assert!(matches!(
            idx.keys_not_seen().await,
            Err(IndexError::Unsupported(_))
        ));
        assert_eq!(idx.seen_count(), 0);
    }

    #[tokio::test]
    async fn key_values_enumerates_baseline() {
        let idx = index_of(true, vec![kv("a", "1"), kv("b", "2")]).await;
        let mut pairs = idx.key_values().await.unwrap().collect().await.unwrap();
        pairs.sort_by(|l, r| l.key.cmp(&r.key));
        assert_eq!(pairs, vec![kv("a", "1"), kv("b", "2")]);
    }

    #[tokio::test]
    async fn factory_creates_fresh_indexes() {
        let factory = MemoryIndexFactory;
        let reference = factory.create(Side::Reference, true).await.unwrap();
        let current = factory.create(Side::Current, false).await.unwrap();
        assert!(reference.records_values());
        assert!(!current.records_values());
        reference.close().await.unwrap();
    }
}
