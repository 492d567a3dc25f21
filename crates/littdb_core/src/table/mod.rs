//! Tables: named key-value namespaces.
//!
//! [`ManagedTable`] owns the segments, keymap and garbage collector of one
//! namespace. [`CachedTable`] puts a read-through cache in front of it. Both
//! implement [`Table`], which is what [`LittDB`](crate::LittDB) hands out.
//!
//! ## Lifecycle
//!
//! ```text
//! built ──start──▶ started ──stop──▶ stopped
//!   │                 │                 │
//!   └─────────────────┴──destroy────────┴──▶ destroyed
//! ```
//!
//! A stopped table cannot be restarted; the database builds a new instance
//! instead.

mod cached;
mod gc;
mod managed;
pub mod metadata;

pub use cached::CachedTable;
pub use managed::ManagedTable;
pub use metadata::TableMetadata;

use crate::error::DbResult;
use crate::types::KVPair;
use bytes::Bytes;
use std::time::Duration;

/// Lifecycle state of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    /// Loaded from disk, not yet serving requests.
    Built,
    /// Serving requests; garbage collection is running.
    Started,
    /// Flushed and closed.
    Stopped,
    /// All files deleted.
    Destroyed,
}

/// A key-value namespace.
///
/// Values are immutable once written. Absence is `Ok(None)`, never an
/// error. Writes become durable on [`Table::flush`] or [`Table::stop`].
pub trait Table: Send + Sync {
    /// Returns the table name.
    fn name(&self) -> &str;

    /// Writes a value.
    ///
    /// # Errors
    ///
    /// Returns `DoubleWrite` if double-write protection is enabled and the
    /// key exists, or `TableNotRunning` if the table is not started.
    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()>;

    /// Writes several values. The batch is not atomic: on error a prefix
    /// may have been written.
    fn put_batch(&self, batch: &[KVPair]) -> DbResult<()>;

    /// Reads a value.
    fn get(&self, key: &[u8]) -> DbResult<Option<Bytes>>;

    /// Returns whether a key has a value.
    fn exists(&self, key: &[u8]) -> DbResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Makes every write that happened before this call durable.
    fn flush(&self) -> DbResult<()>;

    /// Returns the time-to-live of values (zero = never expire).
    fn ttl(&self) -> Duration;

    /// Changes the time-to-live. Applies to future garbage collection
    /// passes; existing values are not restamped.
    fn set_ttl(&self, ttl: Duration) -> DbResult<()>;

    /// Returns the sharding factor used for new segments.
    fn sharding_factor(&self) -> u32;

    /// Changes the sharding factor. Applies from the next segment.
    fn set_sharding_factor(&self, sharding_factor: u32) -> DbResult<()>;

    /// Sets the memory budget in bytes (0 = unbounded write buffer, no
    /// read cache).
    fn set_cache_size(&self, bytes: u64) -> DbResult<()>;

    /// Returns an approximate count of live keys.
    fn key_count(&self) -> DbResult<u64>;

    /// Returns the lifecycle state.
    fn state(&self) -> TableState;

    /// Starts serving requests and garbage collection.
    fn start(&self) -> DbResult<()>;

    /// Flushes, seals the active segment and releases resources.
    fn stop(&self) -> DbResult<()>;

    /// Stops the table if needed and deletes all of its files.
    fn destroy(&self) -> DbResult<()>;
}
