//! Metrics hook for cache implementations.

use std::time::Duration;

/// Receives eviction and occupancy reports from a cache.
///
/// Caches hold an `Option<Arc<dyn CacheMetrics>>`; when it is `None` no
/// reporting happens at all.
pub trait CacheMetrics: Send + Sync {
    /// Called once per evicted entry with the time it spent in the cache.
    fn report_eviction(&self, age: Duration);

    /// Called after every mutation with the current entry count and weight.
    fn report_size(&self, size: usize, weight: u64);
}
