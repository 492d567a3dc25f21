//! Cache trait definitions.

use std::sync::Arc;

/// Computes the weight of a cache entry.
///
/// Weights are caller-defined cost units. They are frequently byte counts,
/// but nothing in this crate assumes so.
pub type WeightFn<K, V> = Arc<dyn Fn(&K, &V) -> u64 + Send + Sync>;

/// The default weigher: every entry weighs 1.
#[must_use]
pub fn unit_weight<K, V>() -> WeightFn<K, V> {
    Arc::new(|_, _| 1)
}

/// A weight-bounded cache.
///
/// # Invariants
///
/// - `weight()` equals the sum of the weights of all live entries
/// - `weight() <= max_weight()` after every `put` and `set_max_weight`
/// - `get` never changes eviction order
///
/// Implementations are single-threaded; wrap them in
/// [`crate::ThreadSafeCache`] to share across threads.
pub trait Cache<K, V> {
    /// Looks up a value without affecting eviction order.
    fn get(&self, key: &K) -> Option<&V>;

    /// Inserts a value, evicting older entries until the cache fits.
    ///
    /// An item whose own weight exceeds `max_weight()` is silently dropped.
    fn put(&mut self, key: K, value: V);

    /// Returns the number of entries in the cache.
    fn len(&self) -> usize;

    /// Returns true if the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the total weight of all entries.
    fn weight(&self) -> u64;

    /// Returns the maximum permitted weight.
    fn max_weight(&self) -> u64;

    /// Changes the capacity, evicting immediately if the cache is over it.
    fn set_max_weight(&mut self, max_weight: u64);
}

/// A cache handle that can be shared between threads.
///
/// Values are returned by clone, so `V` is typically cheap to clone
/// (`Arc<T>`, `bytes::Bytes`, small values).
pub trait SharedCache<K, V>: Send + Sync {
    /// Looks up a value without affecting eviction order.
    fn get(&self, key: &K) -> Option<V>;

    /// Inserts a value. See [`Cache::put`].
    fn put(&self, key: K, value: V);

    /// Returns the number of entries in the cache.
    fn len(&self) -> usize;

    /// Returns true if the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the total weight of all entries.
    fn weight(&self) -> u64;

    /// Returns the maximum permitted weight.
    fn max_weight(&self) -> u64;

    /// Changes the capacity. See [`Cache::set_max_weight`].
    fn set_max_weight(&self, max_weight: u64);
}
