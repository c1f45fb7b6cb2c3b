//! Per-key wait registrations.
//!
//! A registration is a [`Notify`] shared by every waiter on one key. It is
//! created when the first waiter arrives and dropped from the map when the
//! last [`Registration`] handle for it goes away.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Registry of notification channels, keyed by storage key.
///
/// The registry lock is only held to look up, create, signal or prune an
/// entry, never while a waiter is suspended.
#[derive(Debug, Default)]
pub struct WaitRegistry {
    channels: Mutex<HashMap<Bytes, Arc<Notify>>>,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<Bytes, Arc<Notify>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the registration for `key`, creating it if no one is waiting yet.
    pub fn register(&self, key: &Bytes) -> Registration<'_> {
        let notify = Arc::clone(self.channels().entry(key.clone()).or_default());

        Registration {
            registry: self,
            key: key.clone(),
            notify,
        }
    }

    /// Wakes every waiter currently registered on `key`.
    ///
    /// Returns false if nobody was registered.
    pub fn notify(&self, key: &[u8]) -> bool {
        match self.channels().get(key) {
            Some(notify) => {
                notify.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// Number of keys with at least one registration alive.
    pub fn len(&self) -> usize {
        self.channels().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A waiter's handle on a key's notification channel.
///
/// Dropping the last handle for a key removes the channel from the registry,
/// whether the waiter was served, timed out, or was cancelled.
#[derive(Debug)]
pub struct Registration<'a> {
    registry: &'a WaitRegistry,
    key: Bytes,
    notify: Arc<Notify>,
}

impl Registration<'_> {
    pub fn notify(&self) -> &Notify {
        &self.notify
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut channels = self.registry.channels();

        // The map holds one reference and this handle another. New handles can
        // only be cloned under the lock held here.
        let last_handle = channels.get(&self.key).is_some_and(|notify| {
            Arc::ptr_eq(notify, &self.notify) && Arc::strong_count(notify) == 2
        });

        if last_handle {
            channels.remove(&self.key);
        }
    }
}
