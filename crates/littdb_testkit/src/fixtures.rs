//! Test fixtures and database helpers.
//!
//! Provides temporary databases that clean up after themselves and a
//! one-shot tracing setup for tests.

use littdb_core::{Config, LittDB};
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A database in a temporary directory, removed on drop.
pub struct TestDb {
    db: Option<LittDB>,
    config: Config,
    // Declared last so the database closes before the directory goes away.
    temp_dir: TempDir,
}

impl TestDb {
    /// Opens a database with [`Config::for_testing`]. It is not started.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Opens and starts a database.
    pub fn started() -> Self {
        let fixture = Self::new();
        fixture.db().start().expect("Failed to start database");
        fixture
    }

    /// Opens a database with a customized test configuration.
    pub fn with_config(customize: impl FnOnce(Config) -> Config) -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = customize(Config::for_testing(temp_dir.path()));
        let db = LittDB::open(config.clone()).expect("Failed to open database");
        Self {
            db: Some(db),
            config,
            temp_dir,
        }
    }

    /// Opens a database spread over `roots` sub-directories.
    pub fn multi_root(roots: usize, customize: impl FnOnce(Config) -> Config) -> Self {
        Self::with_config(|config| {
            let base = config.paths[0].clone();
            let paths = (0..roots).map(|i| base.join(format!("root-{i}"))).collect();
            customize(Config { paths, ..config })
        })
    }

    /// Returns the database.
    pub fn db(&self) -> &LittDB {
        self.db.as_ref().expect("Database is closed")
    }

    /// Returns the configuration the database was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the temporary directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns the root directories.
    pub fn roots(&self) -> &[PathBuf] {
        &self.config.paths
    }

    /// Stops the database and keeps its files.
    pub fn close(&mut self) {
        if let Some(db) = self.db.take() {
            db.stop().expect("Failed to stop database");
        }
    }

    /// Reopens a closed database, optionally with a different configuration.
    pub fn reopen(&mut self, customize: impl FnOnce(Config) -> Config) {
        self.close();
        self.config = customize(self.config.clone());
        self.db = Some(LittDB::open(self.config.clone()).expect("Failed to reopen database"));
    }

    /// Stops, reopens and starts the database with the same configuration.
    pub fn restart(&mut self) {
        self.reopen(|config| config);
        self.db().start().expect("Failed to start database");
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDb {
    type Target = LittDB;

    fn deref(&self) -> &Self::Target {
        self.db()
    }
}

/// Runs a test with a started temporary database.
///
/// # Example
///
/// ```rust,ignore
/// use littdb_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         let table = db.get_table("t").unwrap();
///         table.put(b"k", b"v").unwrap();
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&LittDB) -> R,
{
    let fixture = TestDb::started();
    f(fixture.db())
}
