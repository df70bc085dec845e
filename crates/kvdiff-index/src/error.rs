//! Error types for the index crate.

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The index does not provide the requested optional capability.
    #[error("operation not supported by this index: {0}")]
    Unsupported(&'static str),

    /// The index session was already closed.
    #[error("index session is closed")]
    Closed,

    /// The storage backend behind the index failed.
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A task producing or consuming index data panicked or was aborted.
    #[error("index task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IndexError {
    /// Wrap a backend-specific error.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
