//! Database configuration.

use crate::error::{DbError, DbResult};
use crate::keymap::KeymapType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest shard file a segment may target: offsets must fit in 32 bits.
pub const MAX_SEGMENT_FILE_SIZE: u64 = u32::MAX as u64;

/// Configuration for opening a database.
///
/// Every table created by a database shares this configuration; TTL and
/// sharding factor may later be changed per table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directories. Shards are spread over them round-robin.
    pub paths: Vec<PathBuf>,

    /// Keymap implementation for new tables.
    pub keymap_type: KeymapType,

    /// Default time-to-live for new tables (zero = never expire).
    pub ttl: Duration,

    /// Number of parallel write shards for new tables.
    pub sharding_factor: u32,

    /// A segment is sealed once any shard file reaches this size.
    pub target_segment_file_size: u64,

    /// A segment is sealed once it holds this many keys.
    pub max_segment_key_count: u32,

    /// A segment is sealed once its key file reaches this size.
    pub target_segment_key_file_size: u64,

    /// How often garbage collection runs.
    pub gc_period: Duration,

    /// Read cache budget in bytes per table (0 = no cache).
    pub cache_size: u64,

    /// Whether flushes fsync (safer but slower).
    pub fsync: bool,

    /// Whether writing an existing key is rejected.
    pub double_write_protection: bool,

    /// Whether metrics counters are updated.
    pub metrics_enabled: bool,

    /// Prefix for metric names.
    pub metrics_namespace: String,

    /// Port an embedding application may expose metrics on.
    pub metrics_port: u16,

    /// Remove every root lock on open, live or not.
    pub purge_locks: bool,

    /// Directory that mirrors sealed segments through symlinks.
    pub snapshot_directory: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            keymap_type: KeymapType::Redb,
            ttl: Duration::ZERO,
            sharding_factor: 1,
            target_segment_file_size: 100 * 1024 * 1024, // 100 MB
            max_segment_key_count: 50_000,
            target_segment_key_file_size: 2 * 1024 * 1024, // 2 MB
            gc_period: Duration::from_secs(5 * 60),
            cache_size: 0,
            fsync: true,
            double_write_protection: false,
            metrics_enabled: false,
            metrics_namespace: "litt".to_string(),
            metrics_port: 9101,
            purge_locks: false,
            snapshot_directory: None,
        }
    }
}

impl Config {
    /// Creates a configuration rooted at the given directories.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Creates a fast, non-durable configuration for tests.
    ///
    /// Disables fsync, uses the unsynced persistent keymap, turns metrics on
    /// and shortens the GC period. Not suitable for production data.
    #[must_use]
    pub fn for_testing(path: &Path) -> Self {
        Self {
            keymap_type: KeymapType::RedbUnsafe,
            fsync: false,
            gc_period: Duration::from_millis(100),
            metrics_enabled: true,
            ..Self::new([path])
        }
    }

    /// Sets the keymap implementation.
    #[must_use]
    pub const fn keymap_type(mut self, value: KeymapType) -> Self {
        self.keymap_type = value;
        self
    }

    /// Sets the default TTL.
    #[must_use]
    pub const fn ttl(mut self, value: Duration) -> Self {
        self.ttl = value;
        self
    }

    /// Sets the default sharding factor.
    #[must_use]
    pub const fn sharding_factor(mut self, value: u32) -> Self {
        self.sharding_factor = value;
        self
    }

    /// Sets the target shard file size.
    #[must_use]
    pub const fn target_segment_file_size(mut self, value: u64) -> Self {
        self.target_segment_file_size = value;
        self
    }

    /// Sets the maximum key count per segment.
    #[must_use]
    pub const fn max_segment_key_count(mut self, value: u32) -> Self {
        self.max_segment_key_count = value;
        self
    }

    /// Sets the target key file size.
    #[must_use]
    pub const fn target_segment_key_file_size(mut self, value: u64) -> Self {
        self.target_segment_key_file_size = value;
        self
    }

    /// Sets the garbage collection period.
    #[must_use]
    pub const fn gc_period(mut self, value: Duration) -> Self {
        self.gc_period = value;
        self
    }

    /// Sets the per-table cache budget.
    #[must_use]
    pub const fn cache_size(mut self, value: u64) -> Self {
        self.cache_size = value;
        self
    }

    /// Sets whether flushes fsync.
    #[must_use]
    pub const fn fsync(mut self, value: bool) -> Self {
        self.fsync = value;
        self
    }

    /// Sets whether double writes are rejected.
    #[must_use]
    pub const fn double_write_protection(mut self, value: bool) -> Self {
        self.double_write_protection = value;
        self
    }

    /// Sets whether metrics are recorded.
    #[must_use]
    pub const fn metrics_enabled(mut self, value: bool) -> Self {
        self.metrics_enabled = value;
        self
    }

    /// Sets whether locks are purged on open.
    #[must_use]
    pub const fn purge_locks(mut self, value: bool) -> Self {
        self.purge_locks = value;
        self
    }

    /// Sets the snapshot directory.
    #[must_use]
    pub fn snapshot_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_directory = Some(path.into());
        self
    }

    /// Checks the configuration for values the engine cannot honor.
    pub fn validate(&self) -> DbResult<()> {
        if self.paths.is_empty() {
            return Err(DbError::invalid_config("at least one path is required"));
        }
        if self.sharding_factor == 0 {
            return Err(DbError::invalid_config("sharding factor must be at least 1"));
        }
        if self.target_segment_file_size == 0
            || self.target_segment_file_size > MAX_SEGMENT_FILE_SIZE
        {
            return Err(DbError::invalid_config(format!(
                "target segment file size must be in 1..={MAX_SEGMENT_FILE_SIZE}"
            )));
        }
        if self.max_segment_key_count == 0 {
            return Err(DbError::invalid_config(
                "max segment key count must be at least 1",
            ));
        }
        if self.target_segment_key_file_size == 0 {
            return Err(DbError::invalid_config(
                "target segment key file size must be at least 1",
            ));
        }
        if self.gc_period.is_zero() {
            return Err(DbError::invalid_config("gc period must be non-zero"));
        }
        if let Some(snapshot) = &self.snapshot_directory {
            if self.paths.iter().any(|p| p == snapshot) {
                return Err(DbError::invalid_config(
                    "snapshot directory must not be a root path",
                ));
            }
        }
        Ok(())
    }
}
