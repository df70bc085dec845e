//! Streaming diff engine for kvdiff.
//!
//! Compares a *reference* dataset with a *current* one and emits a typed
//! [`Change`](kvdiff_types::Change) per key into a caller-owned channel,
//! without holding both sides in memory at once.
//!
//! # Strategies
//!
//! - [`DiffEngine::diff`] -- index both streams concurrently, then compare the indexes
//! - [`DiffEngine::diff_stream_reference`] -- index the current stream, stream the reference
//! - [`DiffEngine::diff_stream_index`] -- stream the reference against a current index
//! - [`DiffEngine::diff_index_stream`] -- stream the current side against a reference index
//! - [`DiffEngine::diff_index_index`] -- compare two prepared indexes
//!
//! Free functions with the same names run on a default engine (in-memory
//! indexes, `kvdiff.diff` span).

pub mod engine;
pub mod error;
pub mod summary;

pub use engine::{
    diff, diff_index_index, diff_index_stream, diff_stream_index, diff_stream_reference,
    DiffEngine,
};
pub use error::{DiffError, DiffResult};
pub use summary::DiffSummary;
