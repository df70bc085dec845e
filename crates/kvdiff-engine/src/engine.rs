//! Diff strategies.
//!
//! Every strategy funnels into one comparison loop (`walk`) followed by a
//! sweep over the keys the loop never matched. The strategies only differ in
//! which side is streamed, which side is indexed, and how the two outcomes
//! are named.
//!
//! # Design Rules
//!
//! - Changes follow the walked stream's order; the sweep runs strictly after.
//! - Cancellation is checked before every item and skips the sweep.
//! - Capability preconditions are checked before the first change is sent.
//! - Indexes created by the engine are closed on every exit path.

use std::sync::Arc;

use kvdiff_index::{Feed, Index, IndexError, IndexFactory, MemoryIndexFactory};
use kvdiff_types::{Change, CompareResult, KeyValue, Side, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, trace, warn, Instrument, Span};

use crate::error::{DiffError, DiffResult};
use crate::summary::DiffSummary;

/// Runs diffs with a configurable index factory and tracing span.
#[derive(Clone)]
pub struct DiffEngine {
    factory: Arc<dyn IndexFactory>,
    span: Span,
}

impl DiffEngine {
    /// An engine backed by in-memory indexes, logging under `kvdiff.diff`.
    pub fn new() -> Self {
        Self {
            factory: Arc::new(MemoryIndexFactory),
            span: info_span!("kvdiff.diff"),
        }
    }

    /// Create the indexes of [`diff`](Self::diff) and
    /// [`diff_stream_reference`](Self::diff_stream_reference) with `factory`.
    pub fn with_factory(mut self, factory: Arc<dyn IndexFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Instrument every strategy with `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Index both sides concurrently, then compare the two indexes.
    ///
    /// Neither stream needs to be free of duplicate keys: the last value of
    /// a key wins on each side.
    pub async fn diff(
        &self,
        reference: impl Into<Feed<KeyValue>>,
        current: impl Into<Feed<KeyValue>>,
        changes: &mpsc::Sender<Change>,
        cancel: &CancellationToken,
    ) -> DiffResult<DiffSummary> {
        let (reference, current) = (reference.into(), current.into());
        self.indexed_both(reference, current, changes, cancel)
            .instrument(self.span.clone())
            .await
    }

    /// Index the current side, then stream the reference against it.
    ///
    /// The reference stream must not repeat keys.
    pub async fn diff_stream_reference(
        &self,
        reference: impl Into<Feed<KeyValue>>,
        current: impl Into<Feed<KeyValue>>,
        changes: &mpsc::Sender<Change>,
        cancel: &CancellationToken,
    ) -> DiffResult<DiffSummary> {
        let (reference, current) = (reference.into(), current.into());
        self.indexed_current(reference, current, changes, cancel)
            .instrument(self.span.clone())
            .await
    }

    /// Stream the reference against an already indexed current side.
    ///
    /// Unseen current keys are reported as deleted when the index can
    /// enumerate them; otherwise deletions are not reported.
    pub async fn diff_stream_index(
        &self,
        reference: impl Into<Feed<KeyValue>>,
        current_index: &dyn Index,
        changes: &mpsc::Sender<Change>,
        cancel: &CancellationToken,
    ) -> DiffResult<DiffSummary> {
        stream_index(reference.into(), current_index, changes, cancel)
            .instrument(self.span.clone())
            .await
    }

    /// Stream the current side against an indexed reference.
    ///
    /// The reference index must record values and enumerate unseen keys.
    /// Keys only in the reference are reported as created, keys only in
    /// the current stream as deleted.
    pub async fn diff_index_stream(
        &self,
        reference_index: &dyn Index,
        current: impl Into<Feed<KeyValue>>,
        changes: &mpsc::Sender<Change>,
        cancel: &CancellationToken,
    ) -> DiffResult<DiffSummary> {
        index_stream(reference_index, current.into(), changes, cancel)
            .instrument(self.span.clone())
            .await
    }

    /// Compare two prepared indexes by streaming the reference's contents.
    pub async fn diff_index_index(
        &self,
        reference_index: &dyn Index,
        current_index: &dyn Index,
        changes: &mpsc::Sender<Change>,
        cancel: &CancellationToken,
    ) -> DiffResult<DiffSummary> {
        index_index(reference_index, current_index, changes, cancel)
            .instrument(self.span.clone())
            .await
    }

    async fn indexed_both(
        &self,
        reference: Feed<KeyValue>,
        current: Feed<KeyValue>,
        changes: &mpsc::Sender<Change>,
        cancel: &CancellationToken,
    ) -> DiffResult<DiffSummary> {
        let reference_index = self.factory.create(Side::Reference, true).await?;
        let current_index = match self.factory.create(Side::Current, true).await {
            Ok(index) => index,
            Err(err) => return close_all(Err(err.into()), &[&reference_index]).await,
        };

        let result: DiffResult<DiffSummary> = async {
            ingest_both(&reference_index, &current_index, reference, current).await?;
            index_index(&*reference_index, &*current_index, changes, cancel).await
        }
        .await;

        close_all(result, &[&reference_index, &current_index]).await
    }

    async fn indexed_current(
        &self,
        reference: Feed<KeyValue>,
        current: Feed<KeyValue>,
        changes: &mpsc::Sender<Change>,
        cancel: &CancellationToken,
    ) -> DiffResult<DiffSummary> {
        let current_index = self.factory.create(Side::Current, true).await?;

        let result: DiffResult<DiffSummary> = async {
            debug!("indexing current values");
            current_index
                .index(current, None)
                .await
                .map_err(|source| DiffError::Indexing {
                    side: Side::Current,
                    source,
                })?;
            stream_index(reference, &*current_index, changes, cancel).await
        }
        .await;

        close_all(result, &[&current_index]).await
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DiffEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffEngine")
            .field("span", &self.span)
            .finish_non_exhaustive()
    }
}

/// [`DiffEngine::diff`] on a default engine.
pub async fn diff(
    reference: impl Into<Feed<KeyValue>>,
    current: impl Into<Feed<KeyValue>>,
    changes: &mpsc::Sender<Change>,
    cancel: &CancellationToken,
) -> DiffResult<DiffSummary> {
    DiffEngine::new()
        .diff(reference, current, changes, cancel)
        .await
}

/// [`DiffEngine::diff_stream_reference`] on a default engine.
pub async fn diff_stream_reference(
    reference: impl Into<Feed<KeyValue>>,
    current: impl Into<Feed<KeyValue>>,
    changes: &mpsc::Sender<Change>,
    cancel: &CancellationToken,
) -> DiffResult<DiffSummary> {
    DiffEngine::new()
        .diff_stream_reference(reference, current, changes, cancel)
        .await
}

/// [`DiffEngine::diff_stream_index`] on a default engine.
pub async fn diff_stream_index(
    reference: impl Into<Feed<KeyValue>>,
    current_index: &dyn Index,
    changes: &mpsc::Sender<Change>,
    cancel: &CancellationToken,
) -> DiffResult<DiffSummary> {
    DiffEngine::new()
        .diff_stream_index(reference, current_index, changes, cancel)
        .await
}

/// [`DiffEngine::diff_index_stream`] on a default engine.
pub async fn diff_index_stream(
    reference_index: &dyn Index,
    current: impl Into<Feed<KeyValue>>,
    changes: &mpsc::Sender<Change>,
    cancel: &CancellationToken,
) -> DiffResult<DiffSummary> {
    DiffEngine::new()
        .diff_index_stream(reference_index, current, changes, cancel)
        .await
}

/// [`DiffEngine::diff_index_index`] on a default engine.
pub async fn diff_index_index(
    reference_index: &dyn Index,
    current_index: &dyn Index,
    changes: &mpsc::Sender<Change>,
    cancel: &CancellationToken,
) -> DiffResult<DiffSummary> {
    DiffEngine::new()
        .diff_index_index(reference_index, current_index, changes, cancel)
        .await
}

/// Ingest both sides in two tasks and wait for both before reporting.
async fn ingest_both(
    reference_index: &Arc<dyn Index>,
    current_index: &Arc<dyn Index>,
    reference: Feed<KeyValue>,
    current: Feed<KeyValue>,
) -> DiffResult<()> {
    debug!("indexing reference and current values");
    let reference_task = spawn_ingest(Arc::clone(reference_index), reference);
    let current_task = spawn_ingest(Arc::clone(current_index), current);

    let reference_result = reference_task.await;
    let current_result = current_task.await;

    for (side, result) in [
        (Side::Reference, reference_result),
        (Side::Current, current_result),
    ] {
        result?.map_err(|source| DiffError::Indexing { side, source })?;
    }
    Ok(())
}

fn spawn_ingest(
    index: Arc<dyn Index>,
    values: Feed<KeyValue>,
) -> tokio::task::JoinHandle<Result<(), IndexError>> {
    tokio::spawn(async move { index.index(values, None).await }.in_current_span())
}

async fn stream_index(
    mut reference: Feed<KeyValue>,
    current_index: &dyn Index,
    changes: &mpsc::Sender<Change>,
    cancel: &CancellationToken,
) -> DiffResult<DiffSummary> {
    debug!("streaming reference against current index");
    let mut summary = DiffSummary::default();

    let walked = walk(
        &mut reference,
        current_index,
        Side::Reference,
        changes,
        cancel,
        &mut summary,
    )
    .await;
    let finished = reference.finish().await;
    if !walked? {
        return Ok(summary.into_cancelled());
    }
    finished?;

    if !current_index.supports_keys_not_seen() {
        debug!("current index cannot enumerate unseen keys, deletions not reported");
        return Ok(summary);
    }

    debug!("reporting deletions");
    let mut unseen = current_index.keys_not_seen().await?;
    while let Some(key) = unseen.next().await {
        emit(changes, Change::deleted(key), &mut summary).await?;
    }
    unseen.finish().await?;

    debug!(?summary, "diff finished");
    Ok(summary)
}

async fn index_stream(
    reference_index: &dyn Index,
    mut current: Feed<KeyValue>,
    changes: &mpsc::Sender<Change>,
    cancel: &CancellationToken,
) -> DiffResult<DiffSummary> {
    if !reference_index.records_values() {
        return Err(DiffError::MustRecordValues);
    }
    if !reference_index.supports_keys_not_seen() {
        return Err(DiffError::MustSupportKeysNotSeen);
    }

    debug!("streaming current values against reference index");
    let mut summary = DiffSummary::default();

    let walked = walk(
        &mut current,
        reference_index,
        Side::Current,
        changes,
        cancel,
        &mut summary,
    )
    .await;
    let finished = current.finish().await;
    if !walked? {
        return Ok(summary.into_cancelled());
    }
    finished?;

    debug!("reporting creations");
    let mut unseen = reference_index.keys_not_seen().await?;
    while let Some(key) = unseen.next().await {
        let value = match reference_index.value(&key).await? {
            Some(value) => value,
            None => {
                warn!(key = ?key, "unseen reference key has no recorded value");
                Value::new()
            }
        };
        emit(changes, Change::created(key, value), &mut summary).await?;
    }
    unseen.finish().await?;

    debug!(?summary, "diff finished");
    Ok(summary)
}

async fn index_index(
    reference_index: &dyn Index,
    current_index: &dyn Index,
    changes: &mpsc::Sender<Change>,
    cancel: &CancellationToken,
) -> DiffResult<DiffSummary> {
    let reference = reference_index.key_values().await?;
    stream_index(reference, current_index, changes, cancel).await
}

/// Compare every item of `feed` against `index`.
///
/// `walked` names the side the feed carries; a key missing from the index
/// is created when walking the reference and deleted when walking the
/// current side. Returns `false` if cancellation stopped the walk.
async fn walk(
    feed: &mut Feed<KeyValue>,
    index: &dyn Index,
    walked: Side,
    changes: &mpsc::Sender<Change>,
    cancel: &CancellationToken,
    summary: &mut DiffSummary,
) -> DiffResult<bool> {
    loop {
        let kv = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(side = %walked, "diff cancelled");
                return Ok(false);
            }
            next = feed.next() => match next {
                Some(kv) => kv,
                None => return Ok(true),
            },
        };

        let result = index.compare(&kv).await?;
        trace!(side = %walked, key = ?kv.key, %result, "compared");

        let KeyValue { key, value } = kv;
        let change = match (result, walked) {
            (CompareResult::Missing, Side::Reference) => Change::created(key, value),
            (CompareResult::Missing, Side::Current) => Change::deleted(key),
            (CompareResult::Modified, _) => Change::modified(key, value),
            (CompareResult::Unchanged, _) => Change::unchanged(key),
        };
        emit(changes, change, summary).await?;
    }
}

async fn emit(
    changes: &mpsc::Sender<Change>,
    change: Change,
    summary: &mut DiffSummary,
) -> DiffResult<()> {
    let kind = change.kind;
    changes
        .send(change)
        .await
        .map_err(|_| DiffError::OutputClosed)?;
    summary.record(kind);
    Ok(())
}

/// Close every index, then report the first failure: the diff's own error
/// wins over a close error.
async fn close_all<T>(result: DiffResult<T>, indexes: &[&Arc<dyn Index>]) -> DiffResult<T> {
    let mut closed = Ok(());
    for index in indexes {
        if let Err(err) = index.close().await {
            warn!(error = %err, "failed to close index");
            if closed.is_ok() {
                closed = Err(err);
            }
        }
    }

    let value = result?;
    closed?;
    Ok(value)
}
