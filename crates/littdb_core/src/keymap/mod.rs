//! Key to address index.
//!
//! A keymap records, for each live key, the [`Address`] of its value. It is
//! independent of value storage: segments are the source of truth, and any
//! keymap can be regenerated by scanning them.
//!
//! ## Implementations
//!
//! - [`MemKeymap`] - a locked hash map; rebuilt from segments on every start
//! - [`RedbKeymap`] - a durable ordered store; survives restarts
//!
//! ## On-disk Layout
//!
//! ```text
//! <root>/<table>/keymap/
//! ├─ keymap-type.txt   # which implementation owns data/
//! ├─ data/             # backend files
//! └─ initialized       # written once the keymap is fully loaded
//! ```
//!
//! The type marker is an on-disk compatibility contract; see
//! [`load_keymap`] for the open/migration protocol.

mod loader;
mod memory;
mod persistent;

pub use loader::{
    clear_initialized, load_keymap, mark_initialized, LoadedKeymap, DATA_DIR, INITIALIZED_FILE,
    KEYMAP_DIR, TYPE_FILE,
};
pub use memory::MemKeymap;
pub use persistent::RedbKeymap;

use crate::error::{DbError, DbResult};
use crate::types::{Address, KAPair};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which keymap implementation a table uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeymapType {
    /// In-memory hash map, rebuilt from segments on every start.
    InMemory,
    /// Durable redb store with synchronous commits.
    Redb,
    /// Redb store with buffered commits. Not crash safe; for tests and
    /// non-production deployments only.
    RedbUnsafe,
}

impl KeymapType {
    /// Returns the text written to the type marker file.
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::InMemory => "in-memory",
            Self::Redb => "redb",
            Self::RedbUnsafe => "redb-unsafe",
        }
    }

    /// Returns true if the keymap survives a restart.
    #[must_use]
    pub const fn is_persistent(self) -> bool {
        !matches!(self, Self::InMemory)
    }

    /// Returns false if a crash can lose committed mappings.
    ///
    /// Such a keymap is only trusted after a clean stop.
    #[must_use]
    pub const fn is_crash_consistent(self) -> bool {
        !matches!(self, Self::RedbUnsafe)
    }

    /// Builds a keymap whose files live in `data_dir`.
    ///
    /// Returns the keymap and whether it must be reloaded from segments.
    pub fn build(
        self,
        data_dir: &Path,
        double_write_protection: bool,
    ) -> DbResult<(Box<dyn Keymap>, bool)> {
        match self {
            Self::InMemory => Ok((Box::new(MemKeymap::new(double_write_protection)), true)),
            Self::Redb | Self::RedbUnsafe => {
                let sync_writes = self == Self::Redb;
                let (keymap, fresh) =
                    RedbKeymap::open(data_dir, sync_writes, double_write_protection)?;
                Ok((Box::new(keymap), fresh))
            }
        }
    }
}

impl fmt::Display for KeymapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

impl FromStr for KeymapType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "in-memory" => Ok(Self::InMemory),
            "redb" => Ok(Self::Redb),
            "redb-unsafe" => Ok(Self::RedbUnsafe),
            other => Err(DbError::invalid_format(format!(
                "unknown keymap type marker: {other:?}"
            ))),
        }
    }
}

/// A mapping from key bytes to value addresses.
///
/// # Invariants
///
/// - With double-write protection enabled, a key maps to at most one address
///   and `put` rejects the whole batch if any key is already present
/// - `get` never errors on absence
pub trait Keymap: Send + Sync {
    /// Returns which implementation this is.
    fn keymap_type(&self) -> KeymapType;

    /// Inserts a batch of mappings.
    ///
    /// # Errors
    ///
    /// Returns `DoubleWrite` without applying anything if double-write
    /// protection is on and any key is already mapped.
    fn put(&self, pairs: &[KAPair]) -> DbResult<()>;

    /// Inserts or overwrites a batch of mappings unconditionally.
    ///
    /// Used when regenerating the keymap from segments.
    fn replace(&self, pairs: &[KAPair]) -> DbResult<()>;

    /// Looks up a key.
    fn get(&self, key: &[u8]) -> DbResult<Option<Address>>;

    /// Removes a batch of keys. Missing keys are ignored.
    fn delete(&self, keys: &[Vec<u8>]) -> DbResult<()>;

    /// Returns the number of mapped keys.
    fn len(&self) -> DbResult<u64>;

    /// Returns true if no key is mapped.
    fn is_empty(&self) -> DbResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Shuts down gracefully, making buffered writes durable.
    fn stop(&self) -> DbResult<()>;

    /// Shuts down and deletes all keymap data.
    fn destroy(&self) -> DbResult<()>;
}

/// Rejects a batch containing a key twice.
fn check_batch_unique(pairs: &[KAPair]) -> DbResult<()> {
    let mut seen = std::collections::HashSet::with_capacity(pairs.len());
    for pair in pairs {
        if !seen.insert(pair.key.as_slice()) {
            return Err(DbError::double_write(&pair.key));
        }
    }
    Ok(())
}
