//! Storage Engine Module
//!
//! This module provides the keyspace: a thread-safe, sharded map from key to a
//! typed entry (string or list) with optional expiry.
//!
//! ## Features
//!
//! - **Sharded Storage**: 64 independent shards reduce lock contention
//! - **Typed Entries**: strings and lists, with wrong-kind access reported as an error
//! - **Passive Expiry**: expired keys are removed when next accessed
//!
//! ## Example
//!
//! ```
//! use tidekv::storage::StorageEngine;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//!
//! engine.set_string(Bytes::from("session"), Bytes::from("token123"), Some(Duration::from_secs(3600)));
//! assert_eq!(engine.get_string(b"session"), Ok(Some(Bytes::from("token123"))));
//! ```

pub mod engine;
pub mod entry;

pub use engine::{normalize_index, ListEnd, StorageEngine};
pub use entry::{Entry, EntryKind, StorageError, StorageResult, Value};
