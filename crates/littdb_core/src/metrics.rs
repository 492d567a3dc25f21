//! Database metrics.
//!
//! Counters are shared by every table of a database and updated with relaxed
//! atomics. When metrics are disabled in the configuration the recording
//! methods return immediately.
//!
//! No exporter is served. An embedding application can read
//! [`DbMetrics::snapshot`] or [`DbMetrics::named_values`] and publish them on
//! the configured port itself.
//!
//! ```rust,ignore
//! let metrics = db.metrics();
//! for (name, value) in metrics.named_values() {
//!     println!("{name} {value}");
//! }
//! ```

use crate::config::Config;
use littdb_cache::CacheMetrics;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Atomic counters for one database.
#[derive(Debug, Default)]
pub struct DbMetrics {
    enabled: AtomicBool,
    namespace: String,
    port: u16,

    puts: AtomicU64,
    gets: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,

    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,
    /// Sum of entry ages at eviction, in microseconds.
    cache_eviction_age_micros: AtomicU64,
    cache_entries: AtomicU64,
    cache_weight: AtomicU64,

    flushes: AtomicU64,
    segments_sealed: AtomicU64,
    segments_deleted: AtomicU64,
    keys_expired: AtomicU64,
    gc_passes: AtomicU64,
}

impl DbMetrics {
    /// Creates metrics configured from `config`.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: AtomicBool::new(config.metrics_enabled),
            namespace: config.metrics_namespace.clone(),
            port: config.metrics_port,
            ..Self::default()
        }
    }

    /// Creates enabled metrics with the default namespace.
    #[must_use]
    pub fn enabled() -> Self {
        Self::new(&Config::default().metrics_enabled(true))
    }

    /// Returns whether counters are being updated.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Returns the metric name prefix.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the port an exporter should listen on.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn add(&self, counter: &AtomicU64, amount: u64) {
        if self.is_enabled() {
            counter.fetch_add(amount, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_put(&self, bytes: u64) {
        self.add(&self.puts, 1);
        self.add(&self.bytes_written, bytes);
    }

    pub(crate) fn record_get(&self, bytes: Option<u64>) {
        self.add(&self.gets, 1);
        if let Some(bytes) = bytes {
            self.add(&self.bytes_read, bytes);
        }
    }

    pub(crate) fn record_cache_hit(&self) {
        self.add(&self.cache_hits, 1);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.add(&self.cache_misses, 1);
    }

    pub(crate) fn record_flush(&self) {
        self.add(&self.flushes, 1);
    }

    pub(crate) fn record_segment_sealed(&self) {
        self.add(&self.segments_sealed, 1);
    }

    pub(crate) fn record_segment_deleted(&self, keys: u64) {
        self.add(&self.segments_deleted, 1);
        self.add(&self.keys_expired, keys);
    }

    pub(crate) fn record_gc_pass(&self) {
        self.add(&self.gc_passes, 1);
    }

    /// Returns a point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            puts: load(&self.puts),
            gets: load(&self.gets),
            bytes_written: load(&self.bytes_written),
            bytes_read: load(&self.bytes_read),
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            cache_evictions: load(&self.cache_evictions),
            cache_eviction_age_micros: load(&self.cache_eviction_age_micros),
            cache_entries: load(&self.cache_entries),
            cache_weight: load(&self.cache_weight),
            flushes: load(&self.flushes),
            segments_sealed: load(&self.segments_sealed),
            segments_deleted: load(&self.segments_deleted),
            keys_expired: load(&self.keys_expired),
            gc_passes: load(&self.gc_passes),
        }
    }

    /// Returns every counter as `(namespaced name, value)`.
    pub fn named_values(&self) -> Vec<(String, u64)> {
        let snapshot = self.snapshot();
        [
            ("puts_total", snapshot.puts),
            ("gets_total", snapshot.gets),
            ("bytes_written_total", snapshot.bytes_written),
            ("bytes_read_total", snapshot.bytes_read),
            ("cache_hits_total", snapshot.cache_hits),
            ("cache_misses_total", snapshot.cache_misses),
            ("cache_evictions_total", snapshot.cache_evictions),
            ("cache_eviction_age_micros_total", snapshot.cache_eviction_age_micros),
            ("cache_entries", snapshot.cache_entries),
            ("cache_weight", snapshot.cache_weight),
            ("flushes_total", snapshot.flushes),
            ("segments_sealed_total", snapshot.segments_sealed),
            ("segments_deleted_total", snapshot.segments_deleted),
            ("keys_expired_total", snapshot.keys_expired),
            ("gc_passes_total", snapshot.gc_passes),
        ]
        .into_iter()
        .map(|(name, value)| (format!("{}_{name}", self.namespace), value))
        .collect()
    }
}

impl CacheMetrics for DbMetrics {
    fn report_eviction(&self, age: Duration) {
        self.add(&self.cache_evictions, 1);
        let micros = u64::try_from(age.as_micros()).unwrap_or(u64::MAX);
        self.add(&self.cache_eviction_age_micros, micros);
    }

    fn report_size(&self, size: usize, weight: u64) {
        if self.is_enabled() {
            self.cache_entries.store(size as u64, Ordering::Relaxed);
            self.cache_weight.store(weight, Ordering::Relaxed);
        }
    }
}

/// A point-in-time copy of [`DbMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Values written.
    pub puts: u64,
    /// Lookups served.
    pub gets: u64,
    /// Value bytes written.
    pub bytes_written: u64,
    /// Value bytes returned by lookups.
    pub bytes_read: u64,
    /// Lookups answered by a table cache.
    pub cache_hits: u64,
    /// Lookups that missed a table cache.
    pub cache_misses: u64,
    /// Entries evicted from table caches.
    pub cache_evictions: u64,
    /// Total age of evicted entries, in microseconds.
    pub cache_eviction_age_micros: u64,
    /// Entries in the most recently reporting cache.
    pub cache_entries: u64,
    /// Weight of the most recently reporting cache.
    pub cache_weight: u64,
    /// Table flushes.
    pub flushes: u64,
    /// Segments sealed.
    pub segments_sealed: u64,
    /// Segments removed by garbage collection.
    pub segments_deleted: u64,
    /// Keys removed by garbage collection.
    pub keys_expired: u64,
    /// Garbage collection passes.
    pub gc_passes: u64,
}
