//! Correlation-keyed completion handles
//!
//! Both the human-approval executor and the JSON-RPC protocol client share
//! the same shape: a caller registers a key, suspends on a completion handle,
//! and some other task later resolves the key with a value. `PendingMap`
//! implements that shape once.
//!
//! Deadlines are the caller's concern (wrap the receiver in
//! `tokio::time::timeout` and call [`PendingMap::remove`] on expiry).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// A table of outstanding waits keyed by correlation id.
///
/// Cloning is cheap; clones share the same underlying table.
#[derive(Debug)]
pub struct PendingMap<T> {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<T>>>>,
}

impl<T> Clone for PendingMap<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for PendingMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PendingMap<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new wait under `key`.
    ///
    /// Returns the receiver to suspend on, or `None` if the key is already
    /// registered (the existing wait is left untouched).
    pub fn register(&self, key: impl Into<String>) -> Option<oneshot::Receiver<T>> {
        let key = key.into();
        let mut map = self.inner.lock();
        if map.contains_key(&key) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        map.insert(key, tx);
        Some(rx)
    }

    /// Resolve the wait registered under `key` with `value`.
    ///
    /// Returns `false` when no wait is registered under the key, or when the
    /// waiter has already gone away (timed out and dropped its receiver).
    pub fn resolve(&self, key: &str, value: T) -> bool {
        let sender = self.inner.lock().remove(key);
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop the wait registered under `key` without resolving it.
    pub fn remove(&self, key: &str) {
        self.inner.lock().remove(key);
    }

    /// Whether a wait is currently registered under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Keys of all registered waits that start with `prefix`
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.inner
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Remove every registered wait and return the completion handles.
    ///
    /// Used on connection close to reject all outstanding requests.
    pub fn drain(&self) -> Vec<(String, oneshot::Sender<T>)> {
        self.inner.lock().drain().collect()
    }

    /// Number of outstanding waits
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<T> PendingMap<T> {
    /// Resolve every outstanding wait with a value produced by `make`.
    ///
    /// Waiters that already went away are skipped.
    pub fn resolve_all_with(&self, mut make: impl FnMut(&str) -> T) {
        for (key, tx) in self.drain() {
            let _ = tx.send(make(&key));
        }
    }
}
