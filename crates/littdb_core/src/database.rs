//! Database facade: table registry and lifecycle.

use crate::config::Config;
use crate::dir;
use crate::error::{DbError, DbResult};
use crate::lock::{acquire_all, RootLock};
use crate::metrics::DbMetrics;
use crate::table::{CachedTable, ManagedTable, Table};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbState {
    Open,
    Started,
    Closed,
}

struct Registry {
    state: DbState,
    tables: HashMap<String, Arc<dyn Table>>,
    locks: Vec<RootLock>,
}

/// The database handle.
///
/// `LittDB` owns one lock per root directory and a registry of tables.
/// Tables are built on first access and share the database's metrics.
///
/// # Example
///
/// ```rust,no_run
/// use littdb_core::{Config, LittDB};
///
/// let db = LittDB::open(Config::new(["/var/lib/littdb"]))?;
/// db.start()?;
///
/// let table = db.get_table("blobs")?;
/// table.put(b"key", b"value")?;
/// table.flush()?;
/// assert_eq!(table.get(b"key")?.as_deref(), Some(&b"value"[..]));
///
/// db.stop()?;
/// # Ok::<(), littdb_core::DbError>(())
/// ```
pub struct LittDB {
    config: Config,
    metrics: Arc<DbMetrics>,
    registry: Mutex<Registry>,
}

impl LittDB {
    /// Opens a database, locking every configured root.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an invalid configuration and
    /// `LockContention` if a live process holds any root.
    pub fn open(config: Config) -> DbResult<Self> {
        config.validate()?;
        let locks = acquire_all(&config.paths, config.purge_locks)?;
        let metrics = Arc::new(DbMetrics::new(&config));
        info!(
            roots = config.paths.len(),
            keymap = %config.keymap_type,
            "database opened"
        );
        Ok(Self {
            config,
            metrics,
            registry: Mutex::new(Registry {
                state: DbState::Open,
                tables: HashMap::new(),
                locks,
            }),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the shared metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<DbMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns a table, building it on first access.
    ///
    /// A table built after [`LittDB::start`] is started immediately.
    pub fn get_table(&self, name: &str) -> DbResult<Arc<dyn Table>> {
        dir::validate_table_name(name)?;
        let mut registry = self.registry.lock();
        if registry.state == DbState::Closed {
            return Err(DbError::DatabaseClosed);
        }
        if let Some(table) = registry.tables.get(name) {
            return Ok(Arc::clone(table));
        }

        let table = self.build_table(name)?;
        if registry.state == DbState::Started {
            table.start()?;
        }
        registry
            .tables
            .insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    fn build_table(&self, name: &str) -> DbResult<Arc<dyn Table>> {
        let base = ManagedTable::open(name, &self.config, Arc::clone(&self.metrics))?;
        if self.config.cache_size > 0 {
            Ok(Arc::new(CachedTable::new(
                base,
                self.config.cache_size,
                Arc::clone(&self.metrics),
            )))
        } else {
            Ok(Arc::new(base))
        }
    }

    /// Destroys a table and forgets it. Tables that exist only on disk are
    /// loaded first so their files can be removed.
    pub fn drop_table(&self, name: &str) -> DbResult<()> {
        dir::validate_table_name(name)?;
        let mut registry = self.registry.lock();
        if registry.state == DbState::Closed {
            return Err(DbError::DatabaseClosed);
        }
        let table = match registry.tables.remove(name) {
            Some(table) => table,
            None => self.build_table(name)?,
        };
        table.destroy()?;
        info!(table = name, "table dropped");
        Ok(())
    }

    /// Returns the names of loaded tables and tables found on disk.
    pub fn table_names(&self) -> DbResult<BTreeSet<String>> {
        let mut names = dir::list_tables(&self.config.paths)?;
        names.extend(self.registry.lock().tables.keys().cloned());
        Ok(names)
    }

    /// Starts every loaded table and every table built from now on.
    pub fn start(&self) -> DbResult<()> {
        let mut registry = self.registry.lock();
        match registry.state {
            DbState::Started => return Ok(()),
            DbState::Closed => return Err(DbError::DatabaseClosed),
            DbState::Open => {}
        }
        let mut first_error = None;
        for table in registry.tables.values() {
            if let Err(e) = table.start() {
                warn!(table = table.name(), error = %e, "failed to start table");
                first_error.get_or_insert(e);
            }
        }
        registry.state = DbState::Started;
        info!(tables = registry.tables.len(), "database started");
        first_error.map_or(Ok(()), Err)
    }

    /// Stops every table and releases the root locks.
    ///
    /// Shutdown is best effort: every table is stopped even if one fails,
    /// and the first error is returned.
    pub fn stop(&self) -> DbResult<()> {
        let mut registry = self.registry.lock();
        if registry.state == DbState::Closed {
            return Ok(());
        }
        let mut first_error = None;
        for table in registry.tables.values() {
            if let Err(e) = table.stop() {
                warn!(table = table.name(), error = %e, "failed to stop table");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = release_locks(&mut registry) {
            first_error.get_or_insert(e);
        }
        registry.state = DbState::Closed;
        info!("database stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Destroys every table, including tables present only on disk, and
    /// releases the root locks.
    pub fn destroy(&self) -> DbResult<()> {
        let mut registry = self.registry.lock();
        if registry.state == DbState::Closed {
            return Err(DbError::DatabaseClosed);
        }
        let mut first_error = None;

        let on_disk = dir::list_tables(&self.config.paths).unwrap_or_else(|e| {
            warn!(error = %e, "failed to list tables for destruction");
            first_error.get_or_insert(e);
            BTreeSet::new()
        });
        for name in on_disk {
            if registry.tables.contains_key(&name) {
                continue;
            }
            match self.build_table(&name) {
                Ok(table) => {
                    registry.tables.insert(name, table);
                }
                Err(e) => {
                    warn!(table = %name, error = %e, "failed to load table for destruction");
                    first_error.get_or_insert(e);
                }
            }
        }

        for (name, table) in registry.tables.drain() {
            if let Err(e) = table.destroy() {
                warn!(table = %name, error = %e, "failed to destroy table");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = release_locks(&mut registry) {
            first_error.get_or_insert(e);
        }
        registry.state = DbState::Closed;
        info!("database destroyed");
        first_error.map_or(Ok(()), Err)
    }

    /// Returns whether the database still accepts requests.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.registry.lock().state != DbState::Closed
    }
}

fn release_locks(registry: &mut Registry) -> DbResult<()> {
    let mut first_error = None;
    for lock in registry.locks.drain(..) {
        if let Err(e) = lock.release() {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

impl std::fmt::Debug for LittDB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("LittDB")
            .field("paths", &self.config.paths)
            .field("state", &registry.state)
            .field("tables", &registry.tables.len())
            .finish_non_exhaustive()
    }
}

impl Drop for LittDB {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "error while closing database");
        }
    }
}
