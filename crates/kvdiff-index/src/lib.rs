//! Index contract for kvdiff.
//!
//! An index absorbs a stream of key-value pairs (its *baseline*), answers
//! membership and equality queries against it, and remembers which baseline
//! keys were matched during the current session so the diff engine can
//! report the ones that never were.
//!
//! # Key Types
//!
//! - [`Index`] -- The capability-described index contract
//! - [`IndexFactory`] -- Creates fresh indexes for the engine's `diff` entry point
//! - [`Feed`] -- One-shot lazy sequence used for every stream in and out of an index
//! - [`MemoryIndex`] -- Process-local implementation (`HashMap`-backed)

pub mod error;
pub mod feed;
pub mod memory;
pub mod traits;

pub use error::{IndexError, IndexResult};
pub use feed::Feed;
pub use memory::{MemoryIndex, MemoryIndexFactory};
pub use traits::{Index, IndexFactory};
