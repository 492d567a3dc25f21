//! Segment metadata and file naming.

use crate::dir::write_atomic;
use crate::error::{DbError, DbResult};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Magic bytes at the start of a segment metadata file.
pub const METADATA_MAGIC: &[u8; 4] = b"LSEG";
/// Current metadata format version.
pub const METADATA_VERSION: u16 = 1;

/// magic(4) + version(2) + sharding(4) + salt(4) + sealed(1) + created(8)
/// + newest(8) + key_count(4) + crc(4)
const ENCODED_SIZE: usize = 39;

/// Extension of segment metadata files.
pub const METADATA_EXTENSION: &str = "metadata";
/// Extension of segment key files.
pub const KEYS_EXTENSION: &str = "keys";
/// Extension of shard value files.
pub const VALUES_EXTENSION: &str = "values";

/// Returns the metadata file name of a segment.
#[must_use]
pub fn metadata_file_name(index: u32) -> String {
    format!("{index}.{METADATA_EXTENSION}")
}

/// Returns the key file name of a segment.
#[must_use]
pub fn key_file_name(index: u32) -> String {
    format!("{index}.{KEYS_EXTENSION}")
}

/// Returns the value file name of one shard of a segment.
#[must_use]
pub fn value_file_name(index: u32, shard: u32) -> String {
    format!("{index}-{shard}.{VALUES_EXTENSION}")
}

/// A file belonging to a segment, identified by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFileKind {
    /// `{index}.metadata`
    Metadata(u32),
    /// `{index}.keys`
    Keys(u32),
    /// `{index}-{shard}.values`
    Values(u32, u32),
}

impl SegmentFileKind {
    /// Parses a file name. Returns `None` for files that are not segment files.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let (stem, extension) = name.rsplit_once('.')?;
        match extension {
            METADATA_EXTENSION => stem.parse().ok().map(Self::Metadata),
            KEYS_EXTENSION => stem.parse().ok().map(Self::Keys),
            VALUES_EXTENSION => {
                let (index, shard) = stem.split_once('-')?;
                Some(Self::Values(index.parse().ok()?, shard.parse().ok()?))
            }
            _ => None,
        }
    }

    /// Returns the segment index.
    #[must_use]
    pub const fn index(self) -> u32 {
        match self {
            Self::Metadata(index) | Self::Keys(index) | Self::Values(index, _) => index,
        }
    }
}

/// Returns the current wall-clock time in nanoseconds since the epoch.
#[must_use]
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Persistent description of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMetadata {
    /// Number of shard value files.
    pub sharding_factor: u32,
    /// Salt mixed into the shard hash.
    pub salt: u32,
    /// Whether the segment accepts no further writes.
    pub sealed: bool,
    /// Creation time, nanoseconds since the epoch.
    pub created_nanos: u64,
    /// Time of the newest write, nanoseconds since the epoch (0 = none).
    pub newest_write_nanos: u64,
    /// Number of key records.
    pub key_count: u32,
}

impl SegmentMetadata {
    /// Creates metadata for a new, empty segment.
    #[must_use]
    pub fn new(sharding_factor: u32, salt: u32) -> Self {
        Self {
            sharding_factor,
            salt,
            sealed: false,
            created_nanos: now_nanos(),
            newest_write_nanos: 0,
            key_count: 0,
        }
    }

    /// Encodes the metadata.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENCODED_SIZE);
        buf.extend_from_slice(METADATA_MAGIC);
        buf.extend_from_slice(&METADATA_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.sharding_factor.to_le_bytes());
        buf.extend_from_slice(&self.salt.to_le_bytes());
        buf.push(u8::from(self.sealed));
        buf.extend_from_slice(&self.created_nanos.to_le_bytes());
        buf.extend_from_slice(&self.newest_write_nanos.to_le_bytes());
        buf.extend_from_slice(&self.key_count.to_le_bytes());
        let crc = crc32c::crc32c(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes metadata, verifying magic, version and checksum.
    pub fn decode(data: &[u8]) -> DbResult<Self> {
        if data.len() != ENCODED_SIZE {
            return Err(DbError::invalid_format(format!(
                "segment metadata is {} bytes, expected {ENCODED_SIZE}",
                data.len()
            )));
        }
        if &data[0..4] != METADATA_MAGIC {
            return Err(DbError::invalid_format("invalid segment metadata magic"));
        }

        let expected = u32::from_le_bytes([data[35], data[36], data[37], data[38]]);
        let actual = crc32c::crc32c(&data[..35]);
        if expected != actual {
            return Err(DbError::ChecksumMismatch { expected, actual });
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != METADATA_VERSION {
            return Err(DbError::invalid_format(format!(
                "unsupported segment metadata version {version}"
            )));
        }

        let u32_at = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let u64_at = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[at..at + 8]);
            u64::from_le_bytes(bytes)
        };

        let sharding_factor = u32_at(6);
        if sharding_factor == 0 {
            return Err(DbError::invalid_format("segment sharding factor is zero"));
        }

        Ok(Self {
            sharding_factor,
            salt: u32_at(10),
            sealed: data[14] != 0,
            created_nanos: u64_at(15),
            newest_write_nanos: u64_at(23),
            key_count: u32_at(31),
        })
    }

    /// Reads metadata from a file.
    pub fn load(path: &Path) -> DbResult<Self> {
        Self::decode(&fs::read(path)?)
    }

    /// Writes metadata to a file atomically.
    pub fn store(&self, path: &Path, fsync: bool) -> DbResult<()> {
        write_atomic(path, &self.encode(), fsync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_names_parse() {
        assert_eq!(
            SegmentFileKind::parse(&metadata_file_name(12)),
            Some(SegmentFileKind::Metadata(12))
        );
        assert_eq!(
            SegmentFileKind::parse(&key_file_name(3)),
            Some(SegmentFileKind::Keys(3))
        );
        assert_eq!(
            SegmentFileKind::parse(&value_file_name(3, 7)),
            Some(SegmentFileKind::Values(3, 7))
        );
        assert_eq!(SegmentFileKind::parse("table.metadata"), None);
        assert_eq!(SegmentFileKind::parse("3.tmp"), None);
        assert_eq!(SegmentFileKind::parse("keymap"), None);
    }

    #[test]
    fn metadata_round_trip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(metadata_file_name(0));
        let mut metadata = SegmentMetadata::new(4, 0xDEAD_BEEF);
        metadata.sealed = true;
        metadata.newest_write_nanos = 42;
        metadata.key_count = 9;

        metadata.store(&path, false).unwrap();
        assert_eq!(SegmentMetadata::load(&path).unwrap(), metadata);
    }

    #[test]
    fn corrupt_metadata_detected() {
        let mut data = SegmentMetadata::new(1, 1).encode();
        data[20] ^= 0x10;
        assert!(matches!(
            SegmentMetadata::decode(&data),
            Err(DbError::ChecksumMismatch { .. })
        ));

        let mut data = SegmentMetadata::new(1, 1).encode();
        data[0] = b'X';
        assert!(matches!(
            SegmentMetadata::decode(&data),
            Err(DbError::InvalidFormat { .. })
        ));
    }
}
