//! Value and key record encoding.
//!
//! Value record (shard file):
//!
//! ```text
//! | len u32 | value | crc32c u32 |
//! ```
//!
//! Key record (key file):
//!
//! ```text
//! | key_len u32 | key | address u64 | value_len u32 | crc32c u32 |
//! ```
//!
//! Integers are little-endian. Each CRC covers every preceding byte of its
//! record.

use crate::error::{DbError, DbResult};
use crate::types::{Address, ScopedKey};

/// Size of a length prefix.
pub const LEN_SIZE: usize = 4;
/// Size of a trailing checksum.
pub const CRC_SIZE: usize = 4;
/// Largest value that fits in a record.
pub const MAX_VALUE_LEN: usize = u32::MAX as usize - LEN_SIZE - CRC_SIZE;

const KEY_FIXED_SIZE: usize = LEN_SIZE + 8 + 4 + CRC_SIZE;

/// Returns the encoded size of a value record.
#[must_use]
pub const fn value_record_len(value_len: usize) -> usize {
    LEN_SIZE + value_len + CRC_SIZE
}

/// Returns the encoded size of a key record.
#[must_use]
pub const fn key_record_len(key_len: usize) -> usize {
    KEY_FIXED_SIZE + key_len
}

/// Encodes a value record.
pub fn encode_value(value: &[u8]) -> DbResult<Vec<u8>> {
    let len = u32::try_from(value.len())
        .ok()
        .filter(|_| value.len() <= MAX_VALUE_LEN)
        .ok_or_else(|| {
            DbError::invalid_operation(format!("value of {} bytes is too large", value.len()))
        })?;
    let mut buf = Vec::with_capacity(value_record_len(value.len()));
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(value);
    let crc = crc32c::crc32c(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Reads the value length from a record's first bytes.
#[must_use]
pub fn value_len(header: [u8; LEN_SIZE]) -> usize {
    u32::from_le_bytes(header) as usize
}

/// Decodes a complete value record, verifying its checksum.
pub fn decode_value(record: &[u8]) -> DbResult<Vec<u8>> {
    if record.len() < LEN_SIZE + CRC_SIZE {
        return Err(DbError::segment_corruption("value record too short"));
    }
    let len = value_len(read_array(record, 0)?);
    if record.len() != value_record_len(len) {
        return Err(DbError::segment_corruption(format!(
            "value record length mismatch: header says {len}, record has {}",
            record.len() - LEN_SIZE - CRC_SIZE
        )));
    }
    let body_end = LEN_SIZE + len;
    verify_crc(&record[..body_end], read_array(record, body_end)?)?;
    Ok(record[LEN_SIZE..body_end].to_vec())
}

/// Encodes a key record.
pub fn encode_key(key: &[u8], address: Address, value_len: u32) -> DbResult<Vec<u8>> {
    let key_len = u32::try_from(key.len())
        .map_err(|_| DbError::invalid_operation("key is too large"))?;
    let mut buf = Vec::with_capacity(key_record_len(key.len()));
    buf.extend_from_slice(&key_len.to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&address.as_u64().to_le_bytes());
    buf.extend_from_slice(&value_len.to_le_bytes());
    let crc = crc32c::crc32c(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Result of scanning a key file.
#[derive(Debug, Default)]
pub struct KeyScan {
    /// Every intact record, in file order.
    pub keys: Vec<ScopedKey>,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// Whether bytes after the intact prefix were discarded.
    pub torn: bool,
}

/// Decodes every record of a key file.
///
/// An incomplete or checksum-failing final record is reported as a torn
/// tail. A checksum failure followed by more data is corruption.
pub fn scan_keys(data: &[u8]) -> DbResult<KeyScan> {
    let mut scan = KeyScan::default();
    let mut pos = 0usize;

    while pos < data.len() {
        let rest = &data[pos..];
        if rest.len() < LEN_SIZE {
            scan.torn = true;
            break;
        }
        let key_len = u32::from_le_bytes(read_array(rest, 0)?) as usize;
        let total = key_record_len(key_len);
        if rest.len() < total {
            scan.torn = true;
            break;
        }

        let body_end = total - CRC_SIZE;
        if let Err(e) = verify_crc(&rest[..body_end], read_array(rest, body_end)?) {
            if pos + total == data.len() {
                scan.torn = true;
                break;
            }
            return Err(e);
        }

        let key_end = LEN_SIZE + key_len;
        let address = Address::from_u64(u64::from_le_bytes(read_array(rest, key_end)?));
        let value_size = u32::from_le_bytes(read_array(rest, key_end + 8)?);
        scan.keys.push(ScopedKey {
            key: rest[LEN_SIZE..key_end].to_vec(),
            address,
            value_size,
        });
        pos += total;
    }

    scan.valid_len = pos as u64;
    Ok(scan)
}

fn verify_crc(body: &[u8], stored: [u8; CRC_SIZE]) -> DbResult<()> {
    let expected = u32::from_le_bytes(stored);
    let actual = crc32c::crc32c(body);
    if expected != actual {
        return Err(DbError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

fn read_array<const N: usize>(data: &[u8], at: usize) -> DbResult<[u8; N]> {
    data.get(at..at + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| DbError::segment_corruption("record truncated"))
}
