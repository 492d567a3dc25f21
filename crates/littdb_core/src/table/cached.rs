//! Read-through cache in front of a [`ManagedTable`].

use super::managed::ManagedTable;
use super::{Table, TableState};
use crate::error::DbResult;
use crate::metrics::DbMetrics;
use crate::segment::metadata::now_nanos;
use crate::types::KVPair;
use bytes::Bytes;
use littdb_cache::{CacheMetrics, FifoCache, SharedCache, ThreadSafeCache};
use std::sync::Arc;
use std::time::Duration;

/// A cached value and the time it was written or read back, in nanoseconds.
type Stamped = (Bytes, u64);

type ValueCache = ThreadSafeCache<FifoCache<Vec<u8>, Stamped>>;

/// A table whose recently written and read values are kept in memory.
///
/// Entries are weighed by key plus value length. An entry older than the
/// table's TTL is ignored and the read falls through to the base table,
/// so expired values disappear from the cache as they do from disk.
pub struct CachedTable {
    base: ManagedTable,
    cache: ValueCache,
    metrics: Arc<DbMetrics>,
}

impl CachedTable {
    /// Wraps `base` with a cache of `cache_size` bytes.
    #[must_use]
    pub fn new(base: ManagedTable, cache_size: u64, metrics: Arc<DbMetrics>) -> Self {
        let cache = FifoCache::with_weigher(cache_size, |key: &Vec<u8>, (value, _): &Stamped| {
            (key.len() + value.len()) as u64
        })
        .with_metrics(Arc::clone(&metrics) as Arc<dyn CacheMetrics>);
        Self {
            base,
            cache: ThreadSafeCache::new(cache),
            metrics,
        }
    }

    /// Returns the wrapped table.
    #[must_use]
    pub fn base(&self) -> &ManagedTable {
        &self.base
    }

    /// Returns the number of cached values.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn is_fresh(&self, stamped_at: u64) -> bool {
        let ttl = self.base.ttl();
        if ttl.is_zero() {
            return true;
        }
        let ttl_nanos = u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX);
        stamped_at.saturating_add(ttl_nanos) > now_nanos()
    }
}

impl Table for CachedTable {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.base.put(key, value)?;
        self.cache
            .put(key.to_vec(), (Bytes::copy_from_slice(value), now_nanos()));
        Ok(())
    }

    fn put_batch(&self, batch: &[KVPair]) -> DbResult<()> {
        for pair in batch {
            self.put(&pair.key, &pair.value)?;
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> DbResult<Option<Bytes>> {
        self.base.ensure_started()?;
        let key = key.to_vec();
        match self.cache.get(&key) {
            Some((value, stamped_at)) if self.is_fresh(stamped_at) => {
                self.metrics.record_cache_hit();
                return Ok(Some(value));
            }
            _ => self.metrics.record_cache_miss(),
        }

        // A stale entry is replaced by the backfill or evicted in turn.
        let value = self.base.get(&key)?;
        if let Some(value) = &value {
            self.cache.put(key, (value.clone(), now_nanos()));
        }
        Ok(value)
    }

    fn flush(&self) -> DbResult<()> {
        self.base.flush()
    }

    fn ttl(&self) -> Duration {
        self.base.ttl()
    }

    fn set_ttl(&self, ttl: Duration) -> DbResult<()> {
        self.base.set_ttl(ttl)
    }

    fn sharding_factor(&self) -> u32 {
        self.base.sharding_factor()
    }

    fn set_sharding_factor(&self, sharding_factor: u32) -> DbResult<()> {
        self.base.set_sharding_factor(sharding_factor)
    }

    fn set_cache_size(&self, bytes: u64) -> DbResult<()> {
        self.cache.set_max_weight(bytes);
        self.base.set_cache_size(bytes)
    }

    fn key_count(&self) -> DbResult<u64> {
        self.base.key_count()
    }

    fn state(&self) -> TableState {
        self.base.state()
    }

    fn start(&self) -> DbResult<()> {
        self.base.start()
    }

    fn stop(&self) -> DbResult<()> {
        self.base.stop()
    }

    fn destroy(&self) -> DbResult<()> {
        self.cache.set_max_weight(0);
        self.base.destroy()
    }
}

impl std::fmt::Debug for CachedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTable")
            .field("base", &self.base)
            .field("cached", &self.cache.len())
            .field("cache_weight", &self.cache.weight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    fn cached(path: &std::path::Path, cache_size: u64) -> (CachedTable, Arc<DbMetrics>) {
        let config = Config::for_testing(path).cache_size(cache_size);
        let metrics = Arc::new(DbMetrics::enabled());
        let base = ManagedTable::open("t", &config, Arc::clone(&metrics)).unwrap();
        let table = CachedTable::new(base, cache_size, Arc::clone(&metrics));
        table.start().unwrap();
        (table, metrics)
    }

    #[test]
    fn written_values_are_cached() {
        let dir = tempdir().unwrap();
        let (table, metrics) = cached(dir.path(), 1 << 20);
        table.put(b"k", b"v").unwrap();
        assert_eq!(table.get(b"k").unwrap().unwrap(), &b"v"[..]);
        assert_eq!(metrics.snapshot().cache_hits, 1);
        assert_eq!(metrics.snapshot().cache_misses, 0);
    }

    #[test]
    fn misses_backfill_the_cache() {
        let dir = tempdir().unwrap();
        let config = Config::for_testing(dir.path());
        {
            let table = ManagedTable::open("t", &config, Arc::new(DbMetrics::default())).unwrap();
            table.start().unwrap();
            table.put(b"k", b"stored").unwrap();
            table.stop().unwrap();
        }

        let (table, metrics) = cached(dir.path(), 1 << 20);
        assert_eq!(table.cached_len(), 0);
        assert_eq!(table.get(b"k").unwrap().unwrap(), &b"stored"[..]);
        assert_eq!(table.cached_len(), 1);
        assert_eq!(table.get(b"k").unwrap().unwrap(), &b"stored"[..]);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.cache_hits, 1);
    }

    #[test]
    fn absent_keys_are_not_cached() {
        let dir = tempdir().unwrap();
        let (table, _) = cached(dir.path(), 1 << 20);
        assert_eq!(table.get(b"nothing").unwrap(), None);
        assert_eq!(table.cached_len(), 0);
    }

    #[test]
    fn cache_respects_budget() {
        let dir = tempdir().unwrap();
        let (table, metrics) = cached(dir.path(), 100);
        for i in 0..20u32 {
            table.put(&i.to_le_bytes(), &[7u8; 16]).unwrap();
        }
        assert!(table.cache.weight() <= 100);
        assert!(metrics.snapshot().cache_evictions > 0);
        // Evicted values still come from disk.
        assert_eq!(table.get(&0u32.to_le_bytes()).unwrap().unwrap(), &[7u8; 16][..]);
    }

    #[test]
    fn resize_shrinks_cache() {
        let dir = tempdir().unwrap();
        let (table, _) = cached(dir.path(), 1 << 20);
        for i in 0..10u32 {
            table.put(&i.to_le_bytes(), b"value").unwrap();
        }
        table.set_cache_size(0).unwrap();
        assert_eq!(table.cached_len(), 0);
        assert!(table.exists(&3u32.to_le_bytes()).unwrap());
    }

    #[test]
    fn failed_write_is_not_cached() {
        let dir = tempdir().unwrap();
        let (table, _) = cached(dir.path(), 1 << 20);
        table.stop().unwrap();
        assert!(table.put(b"k", b"v").is_err());
        assert_eq!(table.cached_len(), 0);
    }

    #[test]
    fn stopped_table_does_not_serve_cached_reads() {
        let dir = tempdir().unwrap();
        let (table, _) = cached(dir.path(), 1 << 20);
        table.put(b"k", b"v").unwrap();
        assert_eq!(table.cached_len(), 1);

        table.stop().unwrap();
        assert_eq!(table.state(), TableState::Stopped);
        assert!(matches!(
            table.get(b"k"),
            Err(crate::error::DbError::TableNotRunning { .. })
        ));
    }

    #[test]
    fn entries_older_than_ttl_fall_through() {
        let dir = tempdir().unwrap();
        let (table, metrics) = cached(dir.path(), 1 << 20);
        table.set_ttl(Duration::from_millis(30)).unwrap();
        table.put(b"k", b"v").unwrap();

        std::thread::sleep(Duration::from_millis(60));
        table.base().collect_garbage().unwrap();
        assert_eq!(table.get(b"k").unwrap(), None);
        assert_eq!(metrics.snapshot().cache_hits, 0);
    }
}
