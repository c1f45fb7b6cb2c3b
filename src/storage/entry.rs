//! Stored entries.
//!
//! An entry's kind is fixed when it is created. Accessors hand out the payload
//! for the expected kind or a [`StorageError::WrongType`]; nothing is coerced.

use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors returned by storage operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// The key holds a value of a different kind than the operation needs
    #[error("operation expects a {expected} but the key holds a {found}")]
    WrongType {
        expected: EntryKind,
        found: EntryKind,
    },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// The kind of value an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    String,
    List,
}

impl EntryKind {
    /// Returns the lowercase name used in replies and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::String => "string",
            EntryKind::List => "list",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A single binary-safe string
    String(Bytes),
    /// An ordered list with O(1) push/pop at both ends
    List(VecDeque<Bytes>),
}

impl Value {
    pub fn kind(&self) -> EntryKind {
        match self {
            Value::String(_) => EntryKind::String,
            Value::List(_) => EntryKind::List,
        }
    }
}

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The actual value stored
    pub value: Value,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a string entry, expiring after `ttl` if one is given.
    pub fn string(value: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            value: Value::String(value),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    /// Creates an empty list entry without expiry.
    pub fn list() -> Self {
        Self {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.value.kind()
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Checks expiry against a given instant.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    /// Returns the string payload, or `WrongType` for a list.
    pub fn as_string(&self) -> StorageResult<&Bytes> {
        match &self.value {
            Value::String(s) => Ok(s),
            other => Err(StorageError::WrongType {
                expected: EntryKind::String,
                found: other.kind(),
            }),
        }
    }

    /// Returns the list, or `WrongType` for a string.
    pub fn as_list(&self) -> StorageResult<&VecDeque<Bytes>> {
        match &self.value {
            Value::List(list) => Ok(list),
            other => Err(StorageError::WrongType {
                expected: EntryKind::List,
                found: other.kind(),
            }),
        }
    }

    /// Mutable form of [`Entry::as_list`].
    pub fn as_list_mut(&mut self) -> StorageResult<&mut VecDeque<Bytes>> {
        match &mut self.value {
            Value::List(list) => Ok(list),
            other => Err(StorageError::WrongType {
                expected: EntryKind::List,
                found: other.kind(),
            }),
        }
    }
}
