//! Error types for LittDB core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors raised by the persistent keymap backend.
#[derive(Debug, Error)]
pub enum KeymapError {
    /// The keymap database could not be opened.
    #[error("redb error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// A read or write inside the keymap database failed.
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    /// The keymap table could not be opened.
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    /// A transaction could not be started.
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),

    /// A transaction could not be committed.
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
}

impl From<redb::TransactionError> for KeymapError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

/// Errors that can occur in LittDB operations.
///
/// Absence of a key is never an error; lookups return `Option`.
#[derive(Debug, Error)]
pub enum DbError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Keymap backend error.
    #[error("keymap error: {0}")]
    Keymap(#[from] KeymapError),

    /// Segment is corrupted or invalid.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Invalid on-disk format.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A key was written twice while double-write protection is enabled.
    #[error("double write rejected: key {key:?} already exists")]
    DoubleWrite {
        /// The offending key (lossy UTF-8 for display).
        key: String,
    },

    /// Another live process holds the lock on a root directory.
    #[error("root {path} is locked by live process {pid}")]
    LockContention {
        /// The lock file.
        path: PathBuf,
        /// PID recorded in the lock file.
        pid: u32,
    },

    /// More than one keymap directory exists for a table.
    #[error("ambiguous keymap: found keymap directories at {paths:?}")]
    AmbiguousKeymap {
        /// Every keymap directory found.
        paths: Vec<PathBuf>,
    },

    /// Configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Table name is not usable as a directory name.
    #[error("invalid table name: {name:?}")]
    InvalidTableName {
        /// The rejected name.
        name: String,
    },

    /// Table is not in the started state.
    #[error("table {name} is not running")]
    TableNotRunning {
        /// Table name.
        name: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Database has been stopped or destroyed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl DbError {
    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a double-write error for a key.
    pub fn double_write(key: &[u8]) -> Self {
        Self::DoubleWrite {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a table-not-running error.
    pub fn table_not_running(name: impl Into<String>) -> Self {
        Self::TableNotRunning { name: name.into() }
    }
}

impl From<redb::DatabaseError> for DbError {
    fn from(e: redb::DatabaseError) -> Self {
        Self::Keymap(e.into())
    }
}

impl From<redb::StorageError> for DbError {
    fn from(e: redb::StorageError) -> Self {
        Self::Keymap(e.into())
    }
}

impl From<redb::TableError> for DbError {
    fn from(e: redb::TableError) -> Self {
        Self::Keymap(e.into())
    }
}

impl From<redb::TransactionError> for DbError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Keymap(e.into())
    }
}

impl From<redb::CommitError> for DbError {
    fn from(e: redb::CommitError) -> Self {
        Self::Keymap(e.into())
    }
}
