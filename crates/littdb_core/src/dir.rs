//! Directory layout.
//!
//! Each root directory holds a lock file and one subdirectory per table:
//!
//! ```text
//! <root>/
//! ├─ littdb.lock              # process lock (see `lock`)
//! └─ <table>/
//!    ├─ table.metadata        # TTL and sharding factor
//!    ├─ keymap/               # only under one root
//!    ├─ {index}.metadata      # segment metadata
//!    ├─ {index}.keys          # segment key file
//!    └─ {index}-{shard}.values
//! ```
//!
//! A table's files may be spread over several roots. Nothing assumes a file
//! stays in the root it was created in; every lookup scans all roots.

use crate::error::{DbError, DbResult};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Longest permitted table name, in bytes.
pub const MAX_TABLE_NAME_LEN: usize = 255;

/// Suffix of temporary files used for atomic replacement.
const TEMP_SUFFIX: &str = ".tmp";

/// Returns the directory of `table` under `root`.
#[must_use]
pub fn table_dir(root: &Path, table: &str) -> PathBuf {
    root.join(table)
}

/// Returns the directory of `table` under every root.
#[must_use]
pub fn table_dirs(roots: &[PathBuf], table: &str) -> Vec<PathBuf> {
    roots.iter().map(|root| table_dir(root, table)).collect()
}

/// Checks that a table name is safe to use as a directory name.
///
/// Names are non-empty ASCII alphanumerics, `_` and `-`, at most
/// [`MAX_TABLE_NAME_LEN`] bytes.
pub fn validate_table_name(name: &str) -> DbResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TABLE_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidTableName {
            name: name.to_string(),
        })
    }
}

/// Returns the names of all tables present under any root.
pub fn list_tables(roots: &[PathBuf]) -> DbResult<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for root in roots {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_table_name(name).is_ok() {
                    names.insert(name.to_string());
                }
            }
        }
    }
    Ok(names)
}

/// Replaces `path` with `data` atomically.
///
/// Writes a sibling temporary file, then renames it over the target. With
/// `fsync` the file and its directory are synced so the rename is durable.
pub fn write_atomic(path: &Path, data: &[u8], fsync: bool) -> DbResult<()> {
    let temp = temp_path(path);
    {
        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        if fsync {
            file.sync_all()?;
        }
    }
    fs::rename(&temp, path)?;
    if fsync {
        if let Some(parent) = path.parent() {
            sync_directory(parent)?;
        }
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Syncs a directory so entry creations, renames and deletions are durable.
#[cfg(unix)]
pub fn sync_directory(path: &Path) -> DbResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

/// Directory fsync is not supported outside unix; the filesystem journal
/// covers metadata there.
#[cfg(not(unix))]
pub fn sync_directory(_path: &Path) -> DbResult<()> {
    Ok(())
}

/// Removes a file, treating absence as success.
pub fn remove_file_if_exists(path: &Path) -> DbResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Removes a directory tree, treating absence as success.
pub fn remove_dir_if_exists(path: &Path) -> DbResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
