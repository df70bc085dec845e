//! The redb-backed [`Index`] implementation.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kvdiff_index::{Feed, Index, IndexError, IndexResult};
use kvdiff_types::{CompareResult, Key, KeyValue, Value};
use redb::Database;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::PersistentIndexConfig;
use crate::error::StoreResult;
use crate::partition::Partition;
use crate::seen::SeenWriter;

/// Lifecycle of a [`PersistentIndex`] session.
///
/// `Open` covers any interleaving of ingestion and comparison. `Draining`
/// is entered by `keys_not_seen` and is irreversible: later comparisons
/// still answer but no longer count as seen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Ingesting and comparing; matched keys are marked seen.
    Open,
    /// Unseen keys were enumerated; new matches are no longer marked.
    Draining,
    /// The session ended and its seen markers were dropped.
    Closed,
}

/// An index whose baseline lives in a named partition of a redb database.
///
/// Opening starts a session with an empty seen set, whatever earlier
/// sessions marked. Seen markers are committed asynchronously by a
/// background writer; [`Index::keys_not_seen`] and [`Index::close`] wait for
/// it to drain first.
///
/// Always `close` a session before opening the same partition again.
/// Dropping an unclosed index stops the writer once it has drained its
/// mailbox, and the next `open` discards the markers it left behind.
///
/// A partition should be reopened with the same `records_values` setting it
/// was populated with: a keys-only baseline stores empty values.
pub struct PersistentIndex {
    db: Arc<Database>,
    partition: Arc<Partition>,
    records_values: bool,
    config: PersistentIndexConfig,
    writer: SeenWriter,
    state: Mutex<SessionState>,
}

impl PersistentIndex {
    /// Open a session on `partition` with the default configuration.
    pub async fn open(
        db: Arc<Database>,
        partition: &str,
        records_values: bool,
    ) -> StoreResult<Self> {
        Self::open_with_config(db, partition, records_values, PersistentIndexConfig::default())
            .await
    }

    /// Open a session on `partition`.
    ///
    /// Creates the partition on first use. Must be called on a tokio runtime,
    /// which hosts the session's seen writer.
    pub async fn open_with_config(
        db: Arc<Database>,
        partition: &str,
        records_values: bool,
        config: PersistentIndexConfig,
    ) -> StoreResult<Self> {
        let partition = Arc::new(Partition::new(partition)?);
        {
            let db = Arc::clone(&db);
            let partition = Arc::clone(&partition);
            tokio::task::spawn_blocking(move || partition.begin_session(&db)).await??;
        }

        let writer = SeenWriter::spawn(Arc::clone(&db), Arc::clone(&partition), &config);
        debug!(partition = %partition.name(), records_values, "persistent index session opened");

        Ok(Self {
            db,
            partition,
            records_values,
            config,
            writer,
            state: Mutex::new(SessionState::Open),
        })
    }

    /// The partition this index is bound to.
    pub fn partition(&self) -> &str {
        self.partition.name()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Whether the session's seen writer may still be active.
    pub fn writer_running(&self) -> bool {
        self.writer.is_running()
    }

    /// Number of entries in the baseline.
    pub fn len(&self) -> StoreResult<u64> {
        self.partition.baseline_len(&self.db)
    }

    /// Returns `true` if the baseline is empty.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every baseline entry (and the session's seen markers).
    pub async fn reset(&self) -> StoreResult<()> {
        self.blocking(|db, partition| partition.clear(db)).await?;
        debug!(partition = %self.partition.name(), "baseline reset");
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database, &Partition) -> StoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let partition = Arc::clone(&self.partition);
        tokio::task::spawn_blocking(move || f(&db, &partition)).await?
    }

    async fn insert_batch(&self, batch: Vec<KeyValue>) -> StoreResult<()> {
        let records_values = self.records_values;
        self.blocking(move |db, partition| partition.insert_batch(db, &batch, records_values))
            .await
    }
}

impl fmt::Debug for PersistentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentIndex")
            .field("partition", &self.partition.name())
            .field("records_values", &self.records_values)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl Index for PersistentIndex {
    async fn index(
        &self,
        mut values: Feed<KeyValue>,
        cancel: Option<&CancellationToken>,
    ) -> IndexResult<()> {
        let batch_size = self.config.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);
        let mut total = 0usize;

        while !cancel.is_some_and(|c| c.is_cancelled()) {
            let Some(kv) = values.next().await else {
                break;
            };
            batch.push(kv);
            if batch.len() >= batch_size {
                total += batch.len();
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                self.insert_batch(full).await?;
            }
        }
        if !batch.is_empty() {
            total += batch.len();
            self.insert_batch(batch).await?;
        }

        debug!(partition = %self.partition.name(), total, "baseline ingested");
        values.finish().await
    }

    async fn compare(&self, kv: &KeyValue) -> IndexResult<CompareResult> {
        let Some(stored) = self.partition.get(&self.db, &kv.key)? else {
            return Ok(CompareResult::Missing);
        };

        if !self.writer.mark(kv.key.clone()).await {
            if self.state() == SessionState::Open {
                warn!(partition = %self.partition.name(), "seen writer stopped; marker dropped");
            } else {
                trace!(partition = %self.partition.name(), "marker after drain ignored");
            }
        }

        if self.records_values && stored != kv.value {
            Ok(CompareResult::Modified)
        } else {
            Ok(CompareResult::Unchanged)
        }
    }

    fn supports_keys_not_seen(&self) -> bool {
        true
    }

    async fn keys_not_seen(&self) -> IndexResult<Feed<Key>> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == SessionState::Closed {
                return Err(IndexError::Closed);
            }
            *state = SessionState::Draining;
        }

        self.writer.quiesce().await?;
        debug!(partition = %self.partition.name(), "scanning for unseen keys");

        let db = Arc::clone(&self.db);
        let partition = Arc::clone(&self.partition);
        Ok(Feed::spawn_blocking(self.config.scan_buffer, move |tx| {
            partition.scan_unseen(&db, tx).map_err(IndexError::from)
        }))
    }

    async fn value(&self, key: &[u8]) -> IndexResult<Option<Value>> {
        if !self.records_values {
            return Ok(None);
        }
        Ok(self.partition.get(&self.db, key)?)
    }

    async fn key_values(&self) -> IndexResult<Feed<KeyValue>> {
        let db = Arc::clone(&self.db);
        let partition = Arc::clone(&self.partition);
        Ok(Feed::spawn_blocking(self.config.scan_buffer, move |tx| {
            partition.scan_baseline(&db, tx).map_err(IndexError::from)
        }))
    }

    fn records_values(&self) -> bool {
        self.records_values
    }

    async fn close(&self) -> IndexResult<()> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::Closed;
        }

        // Both steps run even if the writer failed, so the next session
        // starts clean.
        let drained = self.writer.quiesce().await;
        let ended = self.blocking(|db, partition| partition.end_session(db)).await;
        debug!(partition = %self.partition.name(), "persistent index session closed");

        drained?;
        ended?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn open_db(dir: &tempfile::TempDir) -> Arc<Database> {
        Arc::new(Database::create(dir.path().join("index.redb")).unwrap())
    }

    fn single(key: &'static str, value: &'static str) -> Feed<KeyValue> {
        Feed::buffered(vec![KeyValue::new(key, value)])
    }

    fn key(k: &'static str) -> Key {
        Bytes::from_static(k.as_bytes())
    }

    #[tokio::test]
    async fn keys_not_seen_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let idx = PersistentIndex::open(Arc::clone(&db), "test", true).await.unwrap();
        idx.index(single("a", "value a"), None).await.unwrap();
        let unseen = idx.keys_not_seen().await.unwrap().collect().await.unwrap();
        assert_eq!(unseen, vec![key("a")]);
        idx.close().await.unwrap();

        let idx = PersistentIndex::open(Arc::clone(&db), "test", true).await.unwrap();
        idx.index(single("b", "value b"), None).await.unwrap();
        let result = idx
            .compare(&KeyValue::new("a", "not value a"))
            .await
            .unwrap();
        assert_eq!(result, CompareResult::Modified);

        let unseen = idx.keys_not_seen().await.unwrap().collect().await.unwrap();
        assert_eq!(unseen, vec![key("b")]);
        idx.close().await.unwrap();
        assert!(!idx.writer_running());
    }

    #[tokio::test]
    async fn interrupted_session_closes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let idx = PersistentIndex::open(Arc::clone(&db), "test", true).await.unwrap();
        idx.index(single("b", "value b"), None).await.unwrap();
        idx.close().await.unwrap();

        let idx = PersistentIndex::open(Arc::clone(&db), "test", true).await.unwrap();
        idx.compare(&KeyValue::new("a", "not value a")).await.unwrap();
        idx.compare(&KeyValue::new("b", "value b")).await.unwrap();
        idx.close().await.unwrap();

        assert!(!idx.writer_running());
        assert_eq!(idx.state(), SessionState::Closed);
        assert_eq!(idx.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn close_without_operations_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let idx = PersistentIndex::open(open_db(&dir), "empty", false).await.unwrap();
        idx.close().await.unwrap();
        idx.close().await.unwrap();
        assert!(matches!(idx.keys_not_seen().await, Err(IndexError::Closed)));
    }

    #[tokio::test]
    async fn every_compared_key_is_seen_under_backpressure() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        let config = PersistentIndexConfig {
            batch_size: 7,
            mailbox_capacity: 3,
            scan_buffer: 4,
        };

        let pairs: Vec<KeyValue> = (0..200u32)
            .map(|i| KeyValue::new(format!("key-{i:04}"), format!("value-{i}")))
            .collect();

        let idx = PersistentIndex::open_with_config(Arc::clone(&db), "bulk", true, config.clone())
            .await
            .unwrap();
        idx.index(Feed::buffered(pairs.clone()), None).await.unwrap();
        assert_eq!(idx.len().unwrap(), 200);
        let before = idx.keys_not_seen().await.unwrap().collect().await.unwrap();
        assert_eq!(before.len(), 200);
        idx.close().await.unwrap();

        let idx = PersistentIndex::open_with_config(Arc::clone(&db), "bulk", true, config)
            .await
            .unwrap();
        for kv in &pairs[..150] {
            assert_eq!(idx.compare(kv).await.unwrap(), CompareResult::Unchanged);
        }

        let unseen = idx.keys_not_seen().await.unwrap().collect().await.unwrap();
        let expected: Vec<Key> = pairs[150..].iter().map(|kv| kv.key.clone()).collect();
        assert_eq!(unseen, expected);
        idx.close().await.unwrap();
    }

    #[tokio::test]
    async fn keys_only_partition_never_reports_modified() {
        let dir = tempfile::tempdir().unwrap();
        let idx = PersistentIndex::open(open_db(&dir), "keys", false).await.unwrap();
        idx.index(single("a", "1"), None).await.unwrap();

        assert_eq!(
            idx.compare(&KeyValue::new("a", "2")).await.unwrap(),
            CompareResult::Unchanged
        );
        assert_eq!(
            idx.compare(&KeyValue::new("z", "2")).await.unwrap(),
            CompareResult::Missing
        );
        assert_eq!(idx.value(b"a").await.unwrap(), None);
        idx.close().await.unwrap();
    }

    #[tokio::test]
    async fn key_values_scans_in_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let idx = PersistentIndex::open(open_db(&dir), "ordered", true).await.unwrap();
        idx.index(
            Feed::buffered(vec![
                KeyValue::new("c", "3"),
                KeyValue::new("a", "1"),
                KeyValue::new("b", "2"),
            ]),
            None,
        )
        .await
        .unwrap();

        let pairs = idx.key_values().await.unwrap().collect().await.unwrap();
        assert_eq!(
            pairs,
            vec![
                KeyValue::new("a", "1"),
                KeyValue::new("b", "2"),
                KeyValue::new("c", "3"),
            ]
        );
        assert_eq!(idx.value(b"b").await.unwrap(), Some(Bytes::from_static(b"2")));
        idx.close().await.unwrap();
    }

    #[tokio::test]
    async fn markers_of_an_unclosed_session_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let idx = PersistentIndex::open(Arc::clone(&db), "crash", true).await.unwrap();
        idx.index(single("a", "1"), None).await.unwrap();
        idx.compare(&KeyValue::new("a", "1")).await.unwrap();
        idx.writer.quiesce().await.unwrap();
        assert_eq!(idx.partition.seen_len(&db).unwrap(), 1);
        drop(idx);

        let idx = PersistentIndex::open(Arc::clone(&db), "crash", true).await.unwrap();
        let unseen = idx.keys_not_seen().await.unwrap().collect().await.unwrap();
        assert_eq!(unseen, vec![key("a")]);
        idx.close().await.unwrap();
    }

    #[tokio::test]
    async fn reset_clears_the_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let idx = PersistentIndex::open(open_db(&dir), "reset", true).await.unwrap();
        idx.index(single("a", "1"), None).await.unwrap();
        assert!(!idx.is_empty().unwrap());

        idx.reset().await.unwrap();
        assert!(idx.is_empty().unwrap());
        idx.close().await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_ingestion_keeps_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let idx = PersistentIndex::open(open_db(&dir), "cancel", true).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        idx.index(single("a", "1"), Some(&cancel)).await.unwrap();
        assert!(idx.is_empty().unwrap());
        idx.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ingestion_and_comparison_run_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let config = PersistentIndexConfig {
            batch_size: 16,
            mailbox_capacity: 8,
            scan_buffer: 32,
        };
        let idx = Arc::new(
            PersistentIndex::open_with_config(open_db(&dir), "concurrent", true, config)
                .await
                .unwrap(),
        );

        let existing: Vec<KeyValue> = (0..300u32)
            .map(|i| KeyValue::new(format!("a-{i:04}"), format!("{i}")))
            .collect();
        let incoming: Vec<KeyValue> = (0..300u32)
            .map(|i| KeyValue::new(format!("b-{i:04}"), format!("{i}")))
            .collect();
        idx.index(Feed::buffered(existing.clone()), None).await.unwrap();

        let ingest = tokio::spawn({
            let idx = Arc::clone(&idx);
            let incoming = incoming.clone();
            async move { idx.index(Feed::buffered(incoming), None).await }
        });
        let comparers: Vec<_> = existing
            .chunks(50)
            .map(|chunk| {
                let idx = Arc::clone(&idx);
                let chunk = chunk.to_vec();
                tokio::spawn(async move {
                    for kv in &chunk {
                        assert_eq!(idx.compare(kv).await.unwrap(), CompareResult::Unchanged);
                    }
                })
            })
            .collect();

        ingest.await.unwrap().unwrap();
        for comparer in comparers {
            comparer.await.unwrap();
        }

        let unseen = idx.keys_not_seen().await.unwrap().collect().await.unwrap();
        let expected: Vec<Key> = incoming.iter().map(|kv| kv.key.clone()).collect();
        assert_eq!(unseen, expected);
        idx.close().await.unwrap();
    }
}
