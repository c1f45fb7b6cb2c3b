//! Thread-Safe Storage Engine with Passive Expiry
//!
//! This module implements the keyspace: a concurrent map from key to a typed,
//! optionally expiring [`Entry`] (a string or a list).
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, keys are spread over shards to reduce contention.
//!    Every operation touches exactly one key, so it holds exactly one shard lock.
//! 2. **Passive Expiry**: Expiry is checked on every access to a key. An expired entry is
//!    removed and treated as absent. Nothing sweeps in the background, so an expired key
//!    that is never touched again keeps its memory until the next access.
//! 3. **Typed Entries**: Strings and lists share one map; an operation on the wrong kind
//!    fails with [`StorageError::WrongType`] and leaves the entry untouched.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine performs no I/O and never blocks beyond its own locks. Waiting for
//! data is the job of [`crate::blocking::BlockingCoordinator`].

use crate::storage::entry::{Entry, StorageResult};
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::Range;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::trace;

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// Which end of a list a push goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    /// LPUSH: each value is pushed to the head in argument order
    Head,
    /// RPUSH: values are appended to the tail in argument order
    Tail,
}

type Entries = HashMap<Bytes, Entry>;

/// A single shard containing a portion of the keyspace.
#[derive(Debug, Default)]
struct Shard {
    entries: RwLock<Entries>,
}

impl Shard {
    // Every mutation leaves the map consistent, so a panic elsewhere while the
    // lock was held does not invalidate the data.
    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The main storage engine.
///
/// This struct is designed to be wrapped in an `Arc` and shared across all
/// client tasks. All operations are thread-safe and each one is atomic with
/// respect to its key.
///
/// # Example
///
/// ```
/// use tidekv::storage::{ListEnd, StorageEngine};
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
///
/// engine.set_string(Bytes::from("name"), Bytes::from("tide"), None);
/// assert_eq!(engine.get_string(b"name"), Ok(Some(Bytes::from("tide"))));
///
/// let len = engine
///     .list_push(Bytes::from("queue"), vec![Bytes::from("a"), Bytes::from("b")], ListEnd::Tail)
///     .unwrap();
/// assert_eq!(len, 2);
///
/// // A list operation on a string key fails instead of coercing
/// assert!(engine.list_len(b"name").is_err());
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty storage engine.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();
        Self { shards }
    }

    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Runs `f` against the live entry for `key`.
    ///
    /// The fast path only takes the read lock. If the entry turns out to be
    /// expired, the write lock is taken to evict it and `f` sees whatever is
    /// there afterwards.
    fn read_entry<R>(&self, key: &[u8], f: impl FnOnce(Option<&Entry>) -> R) -> R {
        let shard = self.get_shard(key);

        {
            let entries = shard.read();
            match entries.get(key) {
                Some(entry) if entry.is_expired() => {}
                live => return f(live),
            }
        }

        let mut entries = shard.write();
        evict_if_expired(&mut entries, key);
        f(entries.get(key))
    }

    /// Takes the write lock for `key`'s shard with any expired entry for `key` already removed.
    fn write_shard(&self, key: &[u8]) -> RwLockWriteGuard<'_, Entries> {
        let mut entries = self.get_shard(key).write();
        evict_if_expired(&mut entries, key);
        entries
    }

    // ========================================================================
    // STRING OPERATIONS
    // ========================================================================

    /// Gets the string stored at `key`.
    ///
    /// Returns `Ok(None)` if the key doesn't exist or has expired, and
    /// `WrongType` if it holds a list.
    pub fn get_string(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.read_entry(key, |entry| match entry {
            Some(entry) => entry.as_string().map(|s| Some(s.clone())),
            None => Ok(None),
        })
    }

    /// Stores a string at `key`, replacing any previous entry of either kind.
    ///
    /// With a `ttl` the entry expires that long from now.
    pub fn set_string(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        let mut entries = self.get_shard(&key).write();
        entries.insert(key, Entry::string(value, ttl));
    }

    // ========================================================================
    // LIST OPERATIONS
    // ========================================================================

    /// Pushes values onto the list at `key`, creating the list if needed.
    ///
    /// `ListEnd::Head` pushes each value to the head in argument order, so
    /// `[a, b, c]` ends up as `c, b, a` in front of the old contents.
    ///
    /// # Returns
    /// The length of the list after the push, or `WrongType` if the key holds
    /// a string (which is left unchanged).
    pub fn list_push(&self, key: Bytes, values: Vec<Bytes>, end: ListEnd) -> StorageResult<usize> {
        let mut entries = self.write_shard(&key);

        if values.is_empty() {
            return match entries.get(&key) {
                Some(entry) => entry.as_list().map(|list| list.len()),
                None => Ok(0),
            };
        }

        let list = entries.entry(key).or_insert_with(Entry::list).as_list_mut()?;
        match end {
            ListEnd::Head => {
                for value in values {
                    list.push_front(value);
                }
            }
            ListEnd::Tail => list.extend(values),
        }

        Ok(list.len())
    }

    /// Returns the elements between `start` and `end`, both inclusive.
    ///
    /// Negative indices count from the end (-1 is the last element).
    /// A missing key yields an empty vector.
    pub fn list_range(&self, key: &[u8], start: i64, end: i64) -> StorageResult<Vec<Bytes>> {
        self.read_entry(key, |entry| {
            let Some(entry) = entry else {
                return Ok(Vec::new());
            };
            let list = entry.as_list()?;

            Ok(match range_bounds(start, end, list.len()) {
                Some(range) => list.range(range).cloned().collect(),
                None => Vec::new(),
            })
        })
    }

    /// Returns the length of the list at `key`, 0 if the key doesn't exist.
    pub fn list_len(&self, key: &[u8]) -> StorageResult<usize> {
        self.read_entry(key, |entry| match entry {
            Some(entry) => entry.as_list().map(|list| list.len()),
            None => Ok(0),
        })
    }

    /// Removes up to `count` elements from the head of the list at `key`.
    ///
    /// # Returns
    /// The removed elements in list order (possibly empty). A list emptied by
    /// the pop is removed from the keyspace.
    pub fn list_pop_front(&self, key: &[u8], count: usize) -> StorageResult<Vec<Bytes>> {
        let mut entries = self.write_shard(key);

        let Some(entry) = entries.get_mut(key) else {
            return Ok(Vec::new());
        };
        let list = entry.as_list_mut()?;

        let n = count.min(list.len());
        let popped: Vec<Bytes> = list.drain(..n).collect();

        if list.is_empty() {
            entries.remove(key);
        }

        Ok(popped)
    }

    // ========================================================================
    // KEYSPACE
    // ========================================================================

    /// Returns the number of stored keys, including expired keys that have not
    /// been accessed since they expired.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Returns true if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes `key` if its entry has expired. Returns true if something was removed.
fn evict_if_expired(entries: &mut Entries, key: &[u8]) -> bool {
    if entries.get(key).is_some_and(Entry::is_expired) {
        entries.remove(key);
        trace!(key = ?Bytes::copy_from_slice(key), "evicted expired key");
        return true;
    }
    false
}

/// Maps a possibly negative list index onto `0..=len`.
///
/// A negative index counts from the end and is clamped at the head; a positive
/// index is clamped at `len`.
///
/// ```
/// use tidekv::storage::normalize_index;
///
/// assert_eq!(normalize_index(-1, 3), 2);
/// assert_eq!(normalize_index(-100, 3), 0);
/// assert_eq!(normalize_index(5, 3), 3);
/// ```
pub fn normalize_index(index: i64, len: usize) -> usize {
    let len = len as i64;
    let normalized = if index < 0 { index + len } else { index };
    normalized.clamp(0, len) as usize
}

/// Converts an inclusive `start..=end` request into a half-open range over a
/// list of `len` elements, or `None` when nothing is selected.
fn range_bounds(start: i64, end: i64, len: usize) -> Option<Range<usize>> {
    // An end that lies before the head selects nothing, even though
    // normalization would clamp it to index 0.
    if end < 0 && end + (len as i64) < 0 {
        return None;
    }

    let from = normalize_index(start, len);
    let to = (normalize_index(end, len) + 1).min(len);

    if from >= len || from >= to {
        None
    } else {
        Some(from..to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::entry::{EntryKind, StorageError};

    fn bytes_vec(items: &[&str]) -> Vec<Bytes> {
        items.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    const WRONG_KIND_FOR_LIST: StorageError = StorageError::WrongType {
        expected: EntryKind::List,
        found: EntryKind::String,
    };

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::new();

        engine.set_string(Bytes::from("key"), Bytes::from("value"), None);
        assert_eq!(engine.get_string(b"key"), Ok(Some(Bytes::from("value"))));
    }

    #[test]
    fn test_get_nonexistent() {
        let engine = StorageEngine::new();
        assert_eq!(engine.get_string(b"nonexistent"), Ok(None));
    }

    #[test]
    fn test_expiry_is_passive_and_final() {
        let engine = StorageEngine::new();

        engine.set_string(
            Bytes::from("key"),
            Bytes::from("value"),
            Some(Duration::from_millis(20)),
        );
        assert_eq!(engine.get_string(b"key"), Ok(Some(Bytes::from("value"))));

        std::thread::sleep(Duration::from_millis(40));

        // Still stored until something touches it
        assert_eq!(engine.len(), 1);

        for _ in 0..3 {
            assert_eq!(engine.get_string(b"key"), Ok(None));
        }
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn test_set_overwrites_any_kind() {
        let engine = StorageEngine::new();
        let key = Bytes::from("key");

        engine
            .list_push(key.clone(), bytes_vec(&["a"]), ListEnd::Tail)
            .unwrap();
        engine.set_string(key.clone(), Bytes::from("now a string"), None);

        assert_eq!(engine.get_string(&key), Ok(Some(Bytes::from("now a string"))));
        assert_eq!(engine.list_len(&key), Err(WRONG_KIND_FOR_LIST));
    }

    #[test]
    fn test_push_on_expired_string_creates_list() {
        let engine = StorageEngine::new();
        let key = Bytes::from("key");

        engine.set_string(key.clone(), Bytes::from("v"), Some(Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(25));

        assert_eq!(engine.list_push(key.clone(), bytes_vec(&["a"]), ListEnd::Tail), Ok(1));
        assert_eq!(engine.list_range(&key, 0, -1), Ok(bytes_vec(&["a"])));
    }

    #[test]
    fn test_lpush_rpush() {
        let engine = StorageEngine::new();
        let key = Bytes::from("mylist");

        assert_eq!(engine.list_push(key.clone(), bytes_vec(&["a"]), ListEnd::Head), Ok(1));
        assert_eq!(engine.list_push(key.clone(), bytes_vec(&["b"]), ListEnd::Head), Ok(2));
        assert_eq!(engine.list_range(&key, 0, -1), Ok(bytes_vec(&["b", "a"])));

        assert_eq!(engine.list_push(key.clone(), bytes_vec(&["c"]), ListEnd::Tail), Ok(3));
        assert_eq!(engine.list_range(&key, 0, -1), Ok(bytes_vec(&["b", "a", "c"])));

        // Multiple values at once: y is pushed last and ends up at the head
        assert_eq!(
            engine.list_push(key.clone(), bytes_vec(&["x", "y"]), ListEnd::Head),
            Ok(5)
        );
        assert_eq!(
            engine.list_range(&key, 0, -1),
            Ok(bytes_vec(&["y", "x", "b", "a", "c"]))
        );
    }

    #[test]
    fn test_push_wrong_type_leaves_string() {
        let engine = StorageEngine::new();
        let key = Bytes::from("key");

        engine.set_string(key.clone(), Bytes::from("value"), None);

        assert_eq!(
            engine.list_push(key.clone(), bytes_vec(&["a"]), ListEnd::Tail),
            Err(WRONG_KIND_FOR_LIST)
        );
        assert_eq!(
            engine.list_push(key.clone(), bytes_vec(&["a"]), ListEnd::Head),
            Err(WRONG_KIND_FOR_LIST)
        );
        assert_eq!(engine.get_string(&key), Ok(Some(Bytes::from("value"))));
    }

    #[test]
    fn test_get_on_list_is_wrong_type() {
        let engine = StorageEngine::new();
        let key = Bytes::from("mylist");

        engine
            .list_push(key.clone(), bytes_vec(&["a"]), ListEnd::Tail)
            .unwrap();

        assert_eq!(
            engine.get_string(&key),
            Err(StorageError::WrongType {
                expected: EntryKind::String,
                found: EntryKind::List,
            })
        );
    }

    #[test]
    fn test_push_nothing() {
        let engine = StorageEngine::new();
        let key = Bytes::from("mylist");

        assert_eq!(engine.list_push(key.clone(), Vec::new(), ListEnd::Tail), Ok(0));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_llen() {
        let engine = StorageEngine::new();
        let key = Bytes::from("mylist");

        assert_eq!(engine.list_len(&key), Ok(0));
        engine
            .list_push(key.clone(), bytes_vec(&["a", "b", "c"]), ListEnd::Tail)
            .unwrap();
        assert_eq!(engine.list_len(&key), Ok(3));
    }

    #[test]
    fn test_lrange() {
        let engine = StorageEngine::new();
        let key = Bytes::from("mylist");

        engine
            .list_push(key.clone(), bytes_vec(&["a", "b", "c", "d", "e"]), ListEnd::Tail)
            .unwrap();

        let all = bytes_vec(&["a", "b", "c", "d", "e"]);

        assert_eq!(engine.list_range(&key, 0, -1), Ok(all.clone()));
        assert_eq!(engine.list_range(&key, 1, 3), Ok(bytes_vec(&["b", "c", "d"])));
        assert_eq!(engine.list_range(&key, -3, -1), Ok(bytes_vec(&["c", "d", "e"])));
        assert_eq!(engine.list_range(&key, 1, -1), Ok(bytes_vec(&["b", "c", "d", "e"])));

        // Out of range (should clamp)
        assert_eq!(engine.list_range(&key, 0, 100), Ok(all.clone()));
        assert_eq!(engine.list_range(&key, -100, 100), Ok(all));

        // Nothing selected
        assert_eq!(engine.list_range(&key, 3, 1), Ok(vec![]));
        assert_eq!(engine.list_range(&key, 5, 10), Ok(vec![]));
        assert_eq!(engine.list_range(&key, 0, -100), Ok(vec![]));

        assert_eq!(engine.list_range(b"missing", 0, -1), Ok(vec![]));
    }

    #[test]
    fn test_lrange_wrong_type() {
        let engine = StorageEngine::new();
        engine.set_string(Bytes::from("key"), Bytes::from("v"), None);
        assert_eq!(engine.list_range(b"key", 0, -1), Err(WRONG_KIND_FOR_LIST));
    }

    #[test]
    fn test_pop_front() {
        let engine = StorageEngine::new();
        let key = Bytes::from("mylist");

        assert_eq!(engine.list_pop_front(&key, 1), Ok(vec![]));

        engine
            .list_push(key.clone(), bytes_vec(&["a", "b", "c"]), ListEnd::Tail)
            .unwrap();

        assert_eq!(engine.list_pop_front(&key, 2), Ok(bytes_vec(&["a", "b"])));
        assert_eq!(engine.list_len(&key), Ok(1));
        assert_eq!(engine.list_pop_front(&key, 0), Ok(vec![]));

        // Asking for more than is there takes what exists and removes the key
        assert_eq!(engine.list_pop_front(&key, 10), Ok(bytes_vec(&["c"])));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_pop_front_wrong_type() {
        let engine = StorageEngine::new();
        engine.set_string(Bytes::from("key"), Bytes::from("v"), None);

        assert_eq!(engine.list_pop_front(b"key", 1), Err(WRONG_KIND_FOR_LIST));
        assert_eq!(engine.get_string(b"key"), Ok(Some(Bytes::from("v"))));
    }

    #[test]
    fn test_normalize_index() {
        assert_eq!(normalize_index(-1, 3), 2);
        assert_eq!(normalize_index(-100, 3), 0);
        assert_eq!(normalize_index(5, 3), 3);
        assert_eq!(normalize_index(0, 0), 0);
        assert_eq!(normalize_index(i64::MIN, 3), 0);
        assert_eq!(normalize_index(i64::MAX, 3), 3);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(StorageEngine::new());
        let mut handles = vec![];

        for i in 0..10 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = Bytes::from(format!("key-{}-{}", i, j));
                    engine.set_string(key.clone(), Bytes::from("value"), None);
                    engine.get_string(&key).unwrap();
                    engine
                        .list_push(Bytes::from("shared"), vec![key], ListEnd::Tail)
                        .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), 1001);
        assert_eq!(engine.list_len(b"shared"), Ok(1000));
    }
}
