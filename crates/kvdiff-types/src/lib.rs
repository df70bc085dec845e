//! Foundation types for kvdiff.
//!
//! This crate provides the data model shared by the index and diff crates.
//! Every other kvdiff crate depends on `kvdiff-types`.
//!
//! # Key Types
//!
//! - [`KeyValue`] -- A key and its opaque payload
//! - [`CompareResult`] -- Outcome of probing an index with a key-value pair
//! - [`Change`] / [`ChangeKind`] -- A typed difference emitted by a diff
//! - [`Side`] -- Which side of a diff (reference or current) a value belongs to

pub mod change;
pub mod kv;

pub use change::{Change, ChangeKind, CompareResult, Side};
pub use kv::{Key, KeyValue, Value};
