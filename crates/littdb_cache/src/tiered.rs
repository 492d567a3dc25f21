//! Two-tier cache: a strongly bounded hot tier backed by a soft secondary tier.

use crate::cache::{Cache, WeightFn};
use crate::fifo::FifoCache;
use std::hash::Hash;

/// A hot [`FifoCache`] whose evictions are demoted into a secondary tier.
///
/// Values that fall out of the hot tier get a second, cheaper lease of life
/// in the secondary tier instead of being dropped outright. The secondary
/// tier is sized independently; a capacity of zero disables it.
///
/// `len`, `weight` and `max_weight` cover both tiers. `set_max_weight`
/// resizes the hot tier only, and an item heavier than the hot tier's
/// capacity is dropped.
pub struct TieredCache<K: Hash + Eq, V> {
    hot: FifoCache<K, V>,
    secondary: FifoCache<K, V>,
}

impl<K: Hash + Eq, V> TieredCache<K, V> {
    /// Creates a tiered cache sharing one weigher across both tiers.
    #[must_use]
    pub fn new(hot_weight: u64, secondary_weight: u64, weigher: WeightFn<K, V>) -> Self {
        Self {
            hot: FifoCache::with_weight_fn(hot_weight, weigher.clone()),
            secondary: FifoCache::with_weight_fn(secondary_weight, weigher),
        }
    }

    /// Returns the hot tier.
    pub fn hot(&self) -> &FifoCache<K, V> {
        &self.hot
    }

    /// Returns the secondary tier.
    pub fn secondary(&self) -> &FifoCache<K, V> {
        &self.secondary
    }

    /// Changes the secondary tier capacity.
    pub fn set_secondary_max_weight(&mut self, max_weight: u64) {
        self.secondary.set_max_weight(max_weight);
    }

    fn demote(&mut self, evicted: Vec<(K, V)>) {
        for (key, value) in evicted {
            self.secondary.put(key, value);
        }
    }
}

impl<K: Hash + Eq, V> Cache<K, V> for TieredCache<K, V> {
    fn get(&self, key: &K) -> Option<&V> {
        self.hot.get(key).or_else(|| self.secondary.get(key))
    }

    fn put(&mut self, key: K, value: V) {
        self.secondary.remove(&key);
        let evicted = self.hot.insert(key, value);
        self.demote(evicted);
    }

    fn len(&self) -> usize {
        self.hot.len() + self.secondary.len()
    }

    fn weight(&self) -> u64 {
        self.hot.weight() + self.secondary.weight()
    }

    fn max_weight(&self) -> u64 {
        self.hot.max_weight() + self.secondary.max_weight()
    }

    fn set_max_weight(&mut self, max_weight: u64) {
        let evicted = self.hot.resize(max_weight);
        self.demote(evicted);
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for TieredCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("hot", &self.hot)
            .field("secondary", &self.secondary)
            .finish()
    }
}
