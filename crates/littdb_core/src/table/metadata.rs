//! Persistent per-table settings.

use crate::dir::write_atomic;
use crate::error::{DbError, DbResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the table metadata file.
pub const TABLE_METADATA_FILE: &str = "table.metadata";

const MAGIC: &[u8; 4] = b"LTBL";
const VERSION: u16 = 1;
/// magic(4) + version(2) + ttl(8) + sharding(4) + crc(4)
const ENCODED_SIZE: usize = 22;

/// Settings that outlive a process: TTL and sharding factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableMetadata {
    /// Time-to-live of values (zero = never expire).
    pub ttl: Duration,
    /// Sharding factor of new segments.
    pub sharding_factor: u32,
}

impl TableMetadata {
    /// Encodes the metadata.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let ttl_millis = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        let mut buf = Vec::with_capacity(ENCODED_SIZE);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&ttl_millis.to_le_bytes());
        buf.extend_from_slice(&self.sharding_factor.to_le_bytes());
        let crc = crc32c::crc32c(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes metadata, verifying magic, version and checksum.
    pub fn decode(data: &[u8]) -> DbResult<Self> {
        if data.len() != ENCODED_SIZE || &data[..4] != MAGIC {
            return Err(DbError::invalid_format("invalid table metadata"));
        }
        let expected = u32::from_le_bytes([data[18], data[19], data[20], data[21]]);
        let actual = crc32c::crc32c(&data[..18]);
        if expected != actual {
            return Err(DbError::ChecksumMismatch { expected, actual });
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != VERSION {
            return Err(DbError::invalid_format(format!(
                "unsupported table metadata version {version}"
            )));
        }
        let mut ttl = [0u8; 8];
        ttl.copy_from_slice(&data[6..14]);
        let sharding_factor = u32::from_le_bytes([data[14], data[15], data[16], data[17]]);
        if sharding_factor == 0 {
            return Err(DbError::invalid_format("table sharding factor is zero"));
        }
        Ok(Self {
            ttl: Duration::from_millis(u64::from_le_bytes(ttl)),
            sharding_factor,
        })
    }

    /// Finds the metadata file under any of `table_dirs`.
    pub fn locate(table_dirs: &[PathBuf]) -> Option<PathBuf> {
        table_dirs
            .iter()
            .map(|dir| dir.join(TABLE_METADATA_FILE))
            .find(|path| path.exists())
    }

    /// Reads metadata, returning `None` if the file does not exist.
    pub fn load(path: &Path) -> DbResult<Option<Self>> {
        match fs::read(path) {
            Ok(data) => Self::decode(&data).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes metadata atomically.
    pub fn store(&self, path: &Path, fsync: bool) -> DbResult<()> {
        write_atomic(path, &self.encode(), fsync)
    }
}
