//! One-shot lazy sequences.
//!
//! Every stream that enters or leaves an index is a [`Feed`]: caller-provided
//! input channels, snapshots taken by an in-memory index, and scans produced
//! by a background task over persistent storage. A feed backed by a task
//! reports that task's outcome through [`Feed::finish`], so a scan that
//! stopped half-way on an I/O fault is never mistaken for a complete one.

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::IndexResult;

enum Source<T> {
    Buffered(std::vec::IntoIter<T>),
    Channel(mpsc::Receiver<T>),
}

/// A finite (or caller-terminated), one-shot sequence of items.
pub struct Feed<T> {
    source: Source<T>,
    producer: Option<JoinHandle<IndexResult<()>>>,
}

impl<T> Feed<T> {
    /// A feed that yields nothing.
    pub fn empty() -> Self {
        Self::buffered(Vec::new())
    }

    /// A feed over an already materialized snapshot.
    pub fn buffered(items: Vec<T>) -> Self {
        Self {
            source: Source::Buffered(items.into_iter()),
            producer: None,
        }
    }

    /// A feed over a channel whose sender is owned by someone else.
    ///
    /// The feed ends when every sender is dropped.
    pub fn channel(rx: mpsc::Receiver<T>) -> Self {
        Self {
            source: Source::Channel(rx),
            producer: None,
        }
    }

    /// A feed over a channel filled by `producer`.
    ///
    /// The producer must stop (returning `Ok`) once sending fails, which
    /// happens when the feed is finished or dropped early.
    pub fn produced(rx: mpsc::Receiver<T>, producer: JoinHandle<IndexResult<()>>) -> Self {
        Self {
            source: Source::Channel(rx),
            producer: Some(producer),
        }
    }

    /// Receive the next item, or `None` once the sequence is exhausted.
    ///
    /// Cancel-safe: dropping the returned future never loses an item.
    pub async fn next(&mut self) -> Option<T> {
        match &mut self.source {
            Source::Buffered(items) => items.next(),
            Source::Channel(rx) => rx.recv().await,
        }
    }

    /// Stop consuming and report the producer's outcome.
    ///
    /// Remaining items are discarded. For feeds without a producer this
    /// always succeeds.
    pub async fn finish(mut self) -> IndexResult<()> {
        // Dropping the receiver makes a still-running producer's next send fail.
        self.source = Source::Buffered(Vec::new().into_iter());
        match self.producer.take() {
            Some(producer) => producer.await?,
            None => Ok(()),
        }
    }

    /// Drain every remaining item, then [`finish`](Self::finish).
    pub async fn collect(mut self) -> IndexResult<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item);
        }
        self.finish().await?;
        Ok(items)
    }
}

impl<T: Send + 'static> Feed<T> {
    /// Run `produce` on the blocking thread pool, feeding a channel of the
    /// given capacity.
    ///
    /// Used for scans over synchronous storage engines: the closure sends
    /// with [`mpsc::Sender::blocking_send`] and returns `Ok(())` as soon as a
    /// send fails.
    pub fn spawn_blocking<F>(capacity: usize, produce: F) -> Self
    where
        F: FnOnce(mpsc::Sender<T>) -> IndexResult<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let producer = tokio::task::spawn_blocking(move || produce(tx));
        Self::produced(rx, producer)
    }
}

impl<T> From<mpsc::Receiver<T>> for Feed<T> {
    fn from(rx: mpsc::Receiver<T>) -> Self {
        Self::channel(rx)
    }
}

impl<T> From<Vec<T>> for Feed<T> {
    fn from(items: Vec<T>) -> Self {
        Self::buffered(items)
    }
}

impl<T> fmt::Debug for Feed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Buffered(items) => format!("buffered({})", items.len()),
            Source::Channel(_) => "channel".to_string(),
        };
        f.debug_struct("Feed")
            .field("source", &source)
            .field("produced", &self.producer.is_some())
            .finish()
    }
}
