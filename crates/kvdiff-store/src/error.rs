use kvdiff_index::IndexError;

/// Errors from persistent index operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying redb database failed.
    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),

    /// The partition name cannot be used to derive table names.
    #[error("invalid partition name {name:?}: {reason}")]
    InvalidPartition { name: String, reason: &'static str },

    /// A blocking storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Storage(err.into())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Storage(err.into())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        Self::Storage(err.into())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(err.into())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        Self::Storage(err.into())
    }
}

impl From<StoreError> for IndexError {
    fn from(err: StoreError) -> Self {
        IndexError::backend(err)
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
