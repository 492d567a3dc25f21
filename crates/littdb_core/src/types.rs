//! Core type definitions for LittDB.

use std::fmt;

/// Location of a value on disk.
///
/// The high 32 bits hold the segment index and the low 32 bits the byte
/// offset of the value record inside that segment's shard file. The shard is
/// not encoded: it is recomputed from the key and the segment's salt.
///
/// An address is only meaningful within the table that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address {
    /// Creates an address from a segment index and offset.
    #[must_use]
    pub const fn new(segment_index: u32, offset: u32) -> Self {
        Self(((segment_index as u64) << 32) | offset as u64)
    }

    /// Reconstructs an address from its packed form.
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the packed form.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the segment index.
    #[must_use]
    pub const fn segment_index(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns the offset within the shard file.
    #[must_use]
    pub const fn offset(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment_index(), self.offset())
    }
}

/// A key paired with the address of its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KAPair {
    /// The key.
    pub key: Vec<u8>,
    /// Where the value lives.
    pub address: Address,
}

impl KAPair {
    /// Creates a new pair.
    #[must_use]
    pub fn new(key: Vec<u8>, address: Address) -> Self {
        Self { key, address }
    }
}

/// A key paired with its value: the caller-facing write unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KVPair {
    /// The key.
    pub key: Vec<u8>,
    /// The value.
    pub value: Vec<u8>,
}

impl KVPair {
    /// Creates a new pair.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A key with its address and value length.
///
/// Lets the segment layer describe a record without rereading the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedKey {
    /// The key.
    pub key: Vec<u8>,
    /// Where the value lives.
    pub address: Address,
    /// Length of the value in bytes.
    pub value_size: u32,
}

impl ScopedKey {
    /// Drops the value length.
    #[must_use]
    pub fn into_ka_pair(self) -> KAPair {
        KAPair::new(self.key, self.address)
    }
}
