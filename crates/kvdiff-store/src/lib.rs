//! Persistent index for kvdiff.
//!
//! This crate implements the [`Index`](kvdiff_index::Index) contract on top of
//! [`redb`], an embedded transactional key-value store. An index is bound to a
//! named *partition* of a caller-owned [`redb::Database`]; the database file's
//! lifecycle stays with the caller.
//!
//! # Storage Layout
//!
//! Each partition `name` owns two tables:
//!
//! - `name:baseline` -- key to value, durable across sessions
//! - `name:seen` -- key to `()`, one session's seen markers
//!
//! # Design Rules
//!
//! 1. Opening an index always starts a session with an empty seen table.
//! 2. The baseline is only mutated by ingestion (and an explicit `reset`).
//! 3. Seen markers are written by one background writer per session, in
//!    batches, never with a transaction per comparison.
//! 4. Enumerating unseen keys and closing the session both pass the
//!    quiescence barrier first: every queued marker is committed before the
//!    scan starts or the session ends.
//! 5. Sessions against one partition must not overlap.

pub mod config;
pub mod error;
pub mod factory;
pub mod partition;
pub mod persistent;
mod seen;

pub use config::PersistentIndexConfig;
pub use error::{StoreError, StoreResult};
pub use factory::PersistentIndexFactory;
pub use partition::Partition;
pub use persistent::{PersistentIndex, SessionState};
