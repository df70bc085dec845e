//! Background writer for seen markers.
//!
//! Comparisons enqueue matched keys into a bounded mailbox; a single
//! blocking task drains it and commits markers in batches. The quiescence
//! barrier ([`SeenWriter::quiesce`]) closes the mailbox and joins the task,
//! so once it returns every marker enqueued before it was called is durable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use kvdiff_types::Key;
use redb::Database;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::PersistentIndexConfig;
use crate::error::StoreResult;
use crate::partition::Partition;

pub(crate) struct SeenWriter {
    mailbox: Mutex<Option<mpsc::Sender<Key>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<StoreResult<u64>>>>,
    stopped: AtomicBool,
}

impl SeenWriter {
    /// Start the writer for one session. Must be called on a tokio runtime.
    pub(crate) fn spawn(
        db: Arc<Database>,
        partition: Arc<Partition>,
        config: &PersistentIndexConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let batch_size = config.batch_size.max(1);
        let task = tokio::task::spawn_blocking(move || run(&db, &partition, rx, batch_size));

        Self {
            mailbox: Mutex::new(Some(tx)),
            task: tokio::sync::Mutex::new(Some(task)),
            stopped: AtomicBool::new(false),
        }
    }

    /// Queue a seen marker, waiting while the mailbox is full.
    ///
    /// Returns `false` if the writer no longer accepts markers, either
    /// because the barrier was passed or because the writer failed.
    pub(crate) async fn mark(&self, key: Key) -> bool {
        let mailbox = self.mailbox.lock().expect("mailbox lock poisoned").clone();
        match mailbox {
            Some(tx) => tx.send(key).await.is_ok(),
            None => false,
        }
    }

    /// Whether the writer task may still be active.
    pub(crate) fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Stop accepting markers, then wait until everything already queued
    /// is committed.
    ///
    /// Concurrent callers all return after the writer is gone. The writer's
    /// failure, if any, is reported to the caller that joined it.
    pub(crate) async fn quiesce(&self) -> StoreResult<()> {
        drop(self.mailbox.lock().expect("mailbox lock poisoned").take());

        let mut task = self.task.lock().await;
        let Some(handle) = task.take() else {
            return Ok(());
        };
        let joined = handle.await;
        self.stopped.store(true, Ordering::Release);

        let committed = joined??;
        debug!(committed, "seen writer drained");
        Ok(())
    }
}

fn run(
    db: &Database,
    partition: &Partition,
    mut rx: mpsc::Receiver<Key>,
    batch_size: usize,
) -> StoreResult<u64> {
    let mut batch = Vec::with_capacity(batch_size);
    let mut committed = 0u64;

    while let Some(key) = rx.blocking_recv() {
        batch.push(key);
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(key) => batch.push(key),
                Err(_) => break,
            }
        }

        partition.mark_batch(db, &batch)?;
        committed += batch.len() as u64;
        trace!(partition = %partition.name(), batch = batch.len(), "seen markers committed");
        batch.clear();
    }

    Ok(committed)
}
