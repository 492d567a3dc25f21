//! # LittDB Core
//!
//! Embedded, append-only key-value storage engine.
//!
//! This crate provides:
//! - Sharded segment logs with checksummed value and key records
//! - Pluggable keymaps (in-memory or redb-backed) with type migration
//! - Tables with TTL-driven garbage collection and an optional read cache
//! - Per-root process locks and read-only snapshot mirrors
//! - Lightweight counters for observability
//!
//! Values are immutable once written. They disappear only when their
//! segment expires.
//!
//! ## Directory Layout
//!
//! ```text
//! <root>/
//! ├─ littdb.lock
//! └─ <table>/
//!    ├─ table.metadata
//!    ├─ keymap/
//!    │  ├─ keymap-type.txt
//!    │  ├─ initialized
//!    │  └─ data/
//!    ├─ {index}.metadata
//!    ├─ {index}.keys
//!    └─ {index}-{shard}.values
//! ```
//!
//! With several roots, shard files are spread across them and a table's
//! keymap may live under any one root.
//!
//! ## Example
//!
//! ```rust,no_run
//! use littdb_core::{Config, LittDB};
//! use std::time::Duration;
//!
//! let config = Config::new(["/data/a", "/data/b"])
//!     .ttl(Duration::from_secs(3600))
//!     .sharding_factor(4);
//! let db = LittDB::open(config)?;
//! db.start()?;
//!
//! let table = db.get_table("chunks")?;
//! table.put(b"id", b"payload")?;
//! table.flush()?;
//! # Ok::<(), littdb_core::DbError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
pub mod dir;
mod error;
pub mod keymap;
mod lock;
mod metrics;
pub mod segment;
pub mod snapshot;
pub mod table;
mod types;

pub use config::Config;
pub use database::LittDB;
pub use error::{DbError, DbResult, KeymapError};
pub use keymap::{Keymap, KeymapType};
pub use lock::{RootLock, LOCK_FILE};
pub use metrics::{DbMetrics, MetricsSnapshot};
pub use snapshot::set_lower_bound;
pub use table::{CachedTable, ManagedTable, Table, TableState};
pub use types::{Address, KAPair, KVPair, ScopedKey};
