//! Keymap discovery, type checking and migration.

use super::{Keymap, KeymapType};
use crate::dir::{
    remove_dir_if_exists, remove_file_if_exists, sync_directory, table_dir, write_atomic,
};
use crate::error::{DbError, DbResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Name of the keymap directory inside a table directory.
pub const KEYMAP_DIR: &str = "keymap";
/// Name of the type marker file.
pub const TYPE_FILE: &str = "keymap-type.txt";
/// Name of the backend data directory.
pub const DATA_DIR: &str = "data";
/// Name of the sentinel written once the keymap is fully loaded.
pub const INITIALIZED_FILE: &str = "initialized";

/// A keymap ready for use by a table.
pub struct LoadedKeymap {
    /// The keymap.
    pub keymap: Box<dyn Keymap>,
    /// The keymap directory (holds the marker and sentinel).
    pub directory: PathBuf,
    /// Whether the keymap must be regenerated from segments before use.
    pub requires_reload: bool,
}

impl std::fmt::Debug for LoadedKeymap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedKeymap")
            .field("keymap_type", &self.keymap.keymap_type())
            .field("directory", &self.directory)
            .field("requires_reload", &self.requires_reload)
            .finish()
    }
}

/// Finds or creates the keymap for `table`.
///
/// 1. Every root is searched for `<root>/<table>/keymap`. More than one hit
///    aborts with `AmbiguousKeymap`; none creates one under the first root.
/// 2. A directory without a type marker is discarded and created fresh.
/// 3. A marker without the `initialized` sentinel means a reload was
///    interrupted, or a keymap that is not crash consistent was not
///    stopped cleanly. The directory is discarded and rebuilt.
/// 4. A marker naming another type triggers migration: the old keymap is
///    discarded and the configured type is rebuilt from segments.
/// 5. A matching marker opens the existing keymap.
///
/// The caller must call [`mark_initialized`] after any required reload.
pub fn load_keymap(
    roots: &[PathBuf],
    table: &str,
    keymap_type: KeymapType,
    double_write_protection: bool,
) -> DbResult<LoadedKeymap> {
    let mut found: Vec<PathBuf> = roots
        .iter()
        .map(|root| table_dir(root, table).join(KEYMAP_DIR))
        .filter(|path| path.is_dir())
        .collect();
    if found.len() > 1 {
        return Err(DbError::AmbiguousKeymap { paths: found });
    }

    let directory = match found.pop() {
        Some(path) => path,
        None => {
            let root = roots
                .first()
                .ok_or_else(|| DbError::invalid_config("at least one path is required"))?;
            table_dir(root, table).join(KEYMAP_DIR)
        }
    };

    let marker = directory.join(TYPE_FILE);
    if directory.exists() {
        if !marker.exists() {
            warn!(path = %directory.display(), "keymap directory has no type marker, rebuilding");
            remove_dir_if_exists(&directory)?;
        } else if !directory.join(INITIALIZED_FILE).exists() {
            warn!(
                path = %directory.display(),
                "keymap was not fully initialized, rebuilding"
            );
            remove_dir_if_exists(&directory)?;
        } else {
            let on_disk: KeymapType = fs::read_to_string(&marker)?.parse()?;
            if on_disk != keymap_type {
                info!(
                    table,
                    from = %on_disk,
                    to = %keymap_type,
                    "keymap type changed, migrating"
                );
                remove_dir_if_exists(&directory)?;
            }
        }
    }

    let data_dir = directory.join(DATA_DIR);
    fs::create_dir_all(&data_dir)?;
    if !marker.exists() {
        write_atomic(&marker, keymap_type.marker().as_bytes(), true)?;
    }

    let (keymap, fresh) = keymap_type.build(&data_dir, double_write_protection)?;
    let requires_reload = fresh || !directory.join(INITIALIZED_FILE).exists();

    Ok(LoadedKeymap {
        keymap,
        directory,
        requires_reload,
    })
}

/// Records that the keymap in `directory` is fully loaded.
pub fn mark_initialized(directory: &Path) -> DbResult<()> {
    write_atomic(&directory.join(INITIALIZED_FILE), b"", true)
}

/// Removes the sentinel so the next open rebuilds the keymap unless
/// [`mark_initialized`] runs first.
pub fn clear_initialized(directory: &Path) -> DbResult<()> {
    remove_file_if_exists(&directory.join(INITIALIZED_FILE))?;
    sync_directory(directory)
}
