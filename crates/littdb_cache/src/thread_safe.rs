//! Reader/writer-locked cache wrapper.

use crate::cache::{Cache, SharedCache};
use parking_lot::RwLock;

/// Wraps a [`Cache`] behind a single reader/writer lock.
///
/// Lookups share the lock, mutations take it exclusively. Eviction
/// semantics are exactly those of the wrapped cache.
#[derive(Debug)]
pub struct ThreadSafeCache<C> {
    inner: RwLock<C>,
}

impl<C> ThreadSafeCache<C> {
    /// Wraps a cache.
    pub fn new(cache: C) -> Self {
        Self {
            inner: RwLock::new(cache),
        }
    }

    /// Unwraps the inner cache.
    pub fn into_inner(self) -> C {
        self.inner.into_inner()
    }

    /// Runs a closure with exclusive access to the inner cache.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.inner.write())
    }
}

impl<K, V, C> SharedCache<K, V> for ThreadSafeCache<C>
where
    C: Cache<K, V> + Send + Sync,
    V: Clone,
{
    fn get(&self, key: &K) -> Option<V> {
        self.inner.read().get(key).cloned()
    }

    fn put(&self, key: K, value: V) {
        self.inner.write().put(key, value);
    }

    fn len(&self) -> usize {
        self.inner.read().len()
    }

    fn weight(&self) -> u64 {
        self.inner.read().weight()
    }

    fn max_weight(&self) -> u64 {
        self.inner.read().max_weight()
    }

    fn set_max_weight(&self, max_weight: u64) {
        self.inner.write().set_max_weight(max_weight);
    }
}
