//! First-in, first-out weighted cache.

use crate::cache::{unit_weight, Cache, WeightFn};
use crate::metrics::CacheMetrics;
use lru::LruCache;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

struct Entry<V> {
    value: V,
    weight: u64,
    inserted_at: Instant,
}

/// A weight-bounded cache that evicts in insertion order.
///
/// Reads never promote an entry. Re-inserting an existing key replaces the
/// value, applies the weight delta and moves the key to the back of the
/// eviction queue, so the last write decides its position.
///
/// The queue is an unbounded [`LruCache`] that is only ever read through
/// `peek`: with reads never touching recency, LRU order degenerates into
/// insertion order.
///
/// # Example
///
/// ```rust
/// use littdb_cache::{Cache, FifoCache};
///
/// let mut cache = FifoCache::new(2);
/// cache.put("a", 1);
/// cache.put("b", 2);
/// cache.put("a", 3); // "a" moves behind "b"
/// cache.put("c", 4); // evicts "b"
///
/// assert_eq!(cache.get(&"a"), Some(&3));
/// assert!(cache.get(&"b").is_none());
/// ```
pub struct FifoCache<K: Hash + Eq, V> {
    entries: LruCache<K, Entry<V>>,
    weigher: WeightFn<K, V>,
    max_weight: u64,
    weight: u64,
    metrics: Option<Arc<dyn CacheMetrics>>,
}

impl<K: Hash + Eq, V> FifoCache<K, V> {
    /// Creates a cache where every entry weighs 1.
    #[must_use]
    pub fn new(max_weight: u64) -> Self {
        Self::with_weight_fn(max_weight, unit_weight())
    }

    /// Creates a cache with a custom weigher.
    pub fn with_weigher<F>(max_weight: u64, weigher: F) -> Self
    where
        F: Fn(&K, &V) -> u64 + Send + Sync + 'static,
    {
        Self::with_weight_fn(max_weight, Arc::new(weigher))
    }

    /// Creates a cache from an already shared weigher.
    #[must_use]
    pub fn with_weight_fn(max_weight: u64, weigher: WeightFn<K, V>) -> Self {
        Self {
            entries: LruCache::unbounded(),
            weigher,
            max_weight,
            weight: 0,
            metrics: None,
        }
    }

    /// Attaches a metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns true if the key is cached.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Removes an entry, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.pop(key)?;
        self.weight -= entry.weight;
        self.report_size();
        Some(entry.value)
    }

    /// Inserts a value and returns every entry evicted to make room.
    ///
    /// Oversized values are dropped and reported as evicted themselves, so
    /// callers layering caches can decide where they go.
    pub fn insert(&mut self, key: K, value: V) -> Vec<(K, V)> {
        let weight = (self.weigher)(&key, &value);
        if weight > self.max_weight {
            // A stale value for this key must not outlive the rejected write.
            if let Some(old) = self.entries.pop(&key) {
                self.weight -= old.weight;
                self.report_size();
            }
            return vec![(key, value)];
        }

        let entry = Entry {
            value,
            weight,
            inserted_at: Instant::now(),
        };
        if let Some((_, old)) = self.entries.push(key, entry) {
            self.weight -= old.weight;
        }
        self.weight += weight;

        let evicted = self.evict();
        self.report_size();
        evicted
    }

    fn evict(&mut self) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while self.weight > self.max_weight {
            let Some((key, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.weight -= entry.weight;
            if let Some(metrics) = &self.metrics {
                metrics.report_eviction(entry.inserted_at.elapsed());
            }
            evicted.push((key, entry.value));
        }
        evicted
    }

    fn report_size(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.report_size(self.entries.len(), self.weight);
        }
    }

    /// Changes the capacity and returns the entries evicted by the change.
    pub fn resize(&mut self, max_weight: u64) -> Vec<(K, V)> {
        self.max_weight = max_weight;
        let evicted = self.evict();
        self.report_size();
        evicted
    }
}

impl<K: Hash + Eq, V> Cache<K, V> for FifoCache<K, V> {
    fn get(&self, key: &K) -> Option<&V> {
        self.entries.peek(key).map(|entry| &entry.value)
    }

    fn put(&mut self, key: K, value: V) {
        let _ = self.insert(key, value);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn weight(&self) -> u64 {
        self.weight
    }

    fn max_weight(&self) -> u64 {
        self.max_weight
    }

    fn set_max_weight(&mut self, max_weight: u64) {
        let _ = self.resize(max_weight);
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for FifoCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoCache")
            .field("len", &self.entries.len())
            .field("weight", &self.weight)
            .field("max_weight", &self.max_weight)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        evictions: Mutex<usize>,
        last_size: Mutex<(usize, u64)>,
    }

    impl CacheMetrics for Recorder {
        fn report_eviction(&self, _age: Duration) {
            *self.evictions.lock() += 1;
        }

        fn report_size(&self, size: usize, weight: u64) {
            *self.last_size.lock() = (size, weight);
        }
    }

    #[test]
    fn evicts_in_insertion_order() {
        let mut cache = FifoCache::new(3);
        for i in 0..5 {
            cache.put(i, i * 10);
        }

        assert_eq!(cache.len(), 3);
        assert!(cache.get(&0).is_none());
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.get(&2), Some(&20));
        assert_eq!(cache.get(&4), Some(&40));
    }

    #[test]
    fn reads_do_not_promote() {
        let mut cache = FifoCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);

        for _ in 0..10 {
            assert_eq!(cache.get(&"a"), Some(&1));
        }

        cache.put("c", 3);
        assert!(cache.get(&"a").is_none());
        assert!(cache.get(&"b").is_some());
    }

    #[test]
    fn reinsert_moves_to_back_and_applies_weight_delta() {
        let mut cache = FifoCache::with_weigher(10, |_k: &&str, v: &u64| *v);
        cache.put("a", 2);
        cache.put("b", 3);
        assert_eq!(cache.weight(), 5);

        cache.put("a", 4);
        assert_eq!(cache.weight(), 7);

        // "b" is now the oldest entry.
        cache.put("c", 5);
        assert!(cache.get(&"b").is_none());
        assert_eq!(cache.get(&"a"), Some(&4));
        assert_eq!(cache.weight(), 9);
    }

    #[test]
    fn oversized_item_is_dropped() {
        let mut cache = FifoCache::with_weigher(10, |_k: &u8, v: &Vec<u8>| v.len() as u64);
        cache.put(1, vec![0; 4]);
        cache.put(2, vec![0; 11]);

        assert!(cache.get(&2).is_none());
        assert_eq!(cache.get(&1).map(Vec::len), Some(4));
        assert_eq!(cache.weight(), 4);
    }

    #[test]
    fn oversized_reinsert_removes_stale_value() {
        let mut cache = FifoCache::with_weigher(10, |_k: &u8, v: &Vec<u8>| v.len() as u64);
        cache.put(1, vec![0; 4]);
        cache.put(1, vec![0; 20]);

        assert!(cache.get(&1).is_none());
        assert_eq!(cache.weight(), 0);
    }

    #[test]
    fn shrinking_evicts_until_compliant() {
        let mut cache = FifoCache::new(10);
        for i in 0..10 {
            cache.put(i, ());
        }
        cache.set_max_weight(4);

        assert_eq!(cache.len(), 4);
        assert_eq!(cache.weight(), 4);
        assert!(cache.get(&5).is_none());
        assert!(cache.get(&6).is_some());

        cache.set_max_weight(100);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn zero_capacity_caches_nothing() {
        let mut cache = FifoCache::new(0);
        cache.put(1, 1);
        assert!(cache.is_empty());
        assert_eq!(cache.weight(), 0);
    }

    #[test]
    fn metrics_receive_evictions() {
        let recorder = Arc::new(Recorder::default());
        let mut cache = FifoCache::new(2).with_metrics(recorder.clone());
        for i in 0..5 {
            cache.put(i, i);
        }

        assert_eq!(*recorder.evictions.lock(), 3);
        assert_eq!(*recorder.last_size.lock(), (2, 2));
    }

    #[test]
    fn remove_adjusts_weight() {
        let mut cache = FifoCache::with_weigher(100, |_k: &u8, v: &u64| *v);
        cache.put(1, 30);
        cache.put(2, 20);
        assert_eq!(cache.remove(&1), Some(30));
        assert_eq!(cache.weight(), 20);
        assert!(cache.remove(&1).is_none());
    }

    proptest! {
        #[test]
        fn weight_matches_live_entries(
            ops in prop::collection::vec((0u8..32, 0u64..20), 1..200),
            max_weight in 0u64..100,
        ) {
            let mut cache = FifoCache::with_weigher(max_weight, |_k: &u8, v: &u64| *v);
            for (key, value) in ops {
                cache.put(key, value);
                let live: u64 = (0u8..32).filter_map(|k| cache.get(&k)).sum();
                prop_assert_eq!(cache.weight(), live);
                prop_assert!(cache.weight() <= cache.max_weight());
            }
        }

        #[test]
        fn survivors_are_most_recent_inserts(count in 1usize..100, capacity in 1u64..20) {
            let mut cache = FifoCache::new(capacity);
            for i in 0..count {
                cache.put(i, ());
            }
            let expected_start = count.saturating_sub(capacity as usize);
            for i in 0..count {
                prop_assert_eq!(cache.get(&i).is_some(), i >= expected_start);
            }
        }
    }
}
