//! Concurrent compute-once cache.
//!
//! Converter resolution, document models and table models are all built at
//! most once per key and then shared. [`OnceCache`] keeps one
//! [`OnceLock`] cell per key in a `DashMap`; the map shard lock is released
//! before the value is computed, so slow builders never block unrelated keys
//! and concurrent callers for the same key wait for the single computation.

use std::hash::Hash;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

/// Thread-safe map whose values are computed at most once per key.
#[derive(Debug)]
pub struct OnceCache<K: Eq + Hash, V> {
    cells: DashMap<K, Arc<OnceLock<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> OnceCache<K, V> {
    /// Create a new empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    /// Returns the cached value for `key`, computing it with `init` on the
    /// first call.
    ///
    /// `init` must not request the same key again.
    pub fn get_or_init(&self, key: &K, init: impl FnOnce() -> V) -> V {
        let cell = Arc::clone(&self.cells.entry(key.clone()).or_default());
        cell.get_or_init(init).clone()
    }

    /// Returns the value for `key` if it has been computed.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.cells.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of keys seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for OnceCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
