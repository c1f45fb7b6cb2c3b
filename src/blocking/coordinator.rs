//! Blocking pop coordination.
//!
//! ## Waiter protocol
//!
//! ```text
//!  try pop ──(value)──────────────────────────────> return value
//!     │
//!   (empty)
//!     ▼
//!  register on key
//!     │
//!     ▼
//!  ┌─> enable notification ─> try pop ──(value)───> return value
//!  │                             │
//!  │                          (empty)
//!  │                             ▼
//!  └──(woken)──────────── suspend until woken or deadline ──(deadline)──> timed out
//! ```
//!
//! The notification is enabled *before* the re-check. A push that completes
//! after the re-check released the shard lock signals the key afterwards, and
//! that signal reaches the already-enabled waiter. A push that completed before
//! the re-check is seen by it. Either way no wakeup is lost.
//!
//! Wakes are broadcast: every waiter on the key re-checks under the shard lock
//! and the first one to find data pops it. The others go back to waiting, so
//! service order among waiters is not guaranteed to be arrival order.

use crate::blocking::registry::WaitRegistry;
use crate::storage::{ListEnd, StorageEngine, StorageResult};
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Couples list writes with wakeups for clients blocked on the same key.
///
/// All list pushes that may satisfy a waiter go through [`BlockingCoordinator::push`].
#[derive(Debug)]
pub struct BlockingCoordinator {
    storage: Arc<StorageEngine>,
    waits: WaitRegistry,
}

impl BlockingCoordinator {
    /// Creates a coordinator over the given storage engine.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self {
            storage,
            waits: WaitRegistry::new(),
        }
    }

    /// The storage engine this coordinator writes to.
    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// The wait registrations currently alive.
    pub fn waits(&self) -> &WaitRegistry {
        &self.waits
    }

    /// Pushes values onto a list and wakes every client blocked on `key`.
    ///
    /// The wakeup is sent after the storage lock has been released, so woken
    /// waiters can take it right away.
    pub fn push(&self, key: Bytes, values: Vec<Bytes>, end: ListEnd) -> StorageResult<usize> {
        let len = self.storage.list_push(key.clone(), values, end)?;

        if self.waits.notify(&key) {
            debug!(key = ?key, len, "woke blocked clients");
        }

        Ok(len)
    }

    /// Pops the head of the list at `key`, waiting for one to be pushed if
    /// the list is empty or missing.
    ///
    /// With `deadline == None` the wait is unbounded.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))` - the popped element
    /// - `Ok(None)` - the deadline passed first; nothing was removed
    /// - `Err(WrongType)` - the key holds a string
    pub async fn blocking_pop(
        &self,
        key: &Bytes,
        deadline: Option<Instant>,
    ) -> StorageResult<Option<Bytes>> {
        if let Some(value) = self.try_pop(key)? {
            return Ok(Some(value));
        }

        let registration = self.waits.register(key);
        debug!(key = ?key, ?deadline, "client blocked");

        loop {
            let notified = registration.notify().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(key)? {
                debug!(key = ?key, "blocked client served");
                return Ok(Some(value));
            }

            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, notified).await.is_err() {
                        debug!(key = ?key, "blocked client timed out");
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    fn try_pop(&self, key: &Bytes) -> StorageResult<Option<Bytes>> {
        Ok(self.storage.list_pop_front(key, 1)?.pop())
    }
}
