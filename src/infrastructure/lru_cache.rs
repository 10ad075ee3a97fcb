//! Bounded LRU Cache
//!
//! Fixed-capacity key/value cache with least-recently-used eviction,
//! shared by every concurrent lookup of one resolver.

use crate::error::ConfigError;
use lru::LruCache;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Thread-safe LRU cache.
///
/// A single mutex guards the whole structure, so recency order and the
/// capacity bound stay consistent under concurrent `get`/`put`. Values
/// are handed out as clones.
pub struct BoundedLruCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, V>>,
    capacity: NonZeroUsize,
}

impl<K: Hash + Eq, V: Clone> BoundedLruCache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or(ConfigError::InvalidCacheSize(capacity as i64))?;
        Ok(Self {
            inner: Mutex::new(LruCache::new(capacity)),
            capacity,
        })
    }

    /// Look up a key, marking it most recently used.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().get(key).cloned()
    }

    /// Insert or update a key, marking it most recently used.
    ///
    /// Inserting a new key into a full cache evicts the least recently
    /// used entry.
    pub fn put(&self, key: K, value: V) {
        self.inner.lock().put(key, value);
    }

    /// Check for a key without touching its recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
