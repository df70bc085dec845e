//! Error types for the diff engine.

use kvdiff_index::IndexError;
use kvdiff_types::Side;

/// Errors that can occur during a diff.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// The strategy needs the reference index to retain values.
    #[error("reference index must record values")]
    MustRecordValues,

    /// The strategy needs the reference index to enumerate unseen keys.
    #[error("reference index must support keys_not_seen")]
    MustSupportKeysNotSeen,

    /// Ingesting one side into its index failed.
    #[error("error indexing {side} values: {source}")]
    Indexing {
        side: Side,
        #[source]
        source: IndexError,
    },

    /// An index query or scan failed.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// The receiver of the change channel was dropped.
    #[error("change receiver closed")]
    OutputClosed,

    /// An ingestion task panicked or was aborted.
    #[error("ingestion task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
