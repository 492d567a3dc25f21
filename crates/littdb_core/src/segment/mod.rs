//! Segment log.
//!
//! A segment is the unit of storage and of deletion. It is written under a
//! single index, split across `sharding_factor` shard value files, and is
//! sealed once any size limit is reached. Sealed segments never change and
//! are deleted whole once every value in them has expired.
//!
//! ## Files
//!
//! ```text
//! {index}.metadata          # SegmentMetadata, replaced atomically
//! {index}.keys              # key records, in write order
//! {index}-{shard}.values    # value records for one shard
//! ```
//!
//! A value's [`Address`](crate::types::Address) names its segment and the
//! offset of its record in the shard file. The shard itself is recomputed
//! from the key with [`shard_for_key`] and the segment's salt.

pub mod metadata;
pub mod record;
mod store;

pub use metadata::{SegmentFileKind, SegmentMetadata};
pub use store::{discover, Segment, SegmentFiles, SegmentLimits, WriteOutcome};

use xxhash_rust::xxh64::xxh64;

/// Selects the shard for a key.
///
/// The salt differs per segment so a hot key range does not always land on
/// the same root.
#[must_use]
pub fn shard_for_key(key: &[u8], salt: u32, sharding_factor: u32) -> u32 {
    let factor = u64::from(sharding_factor.max(1));
    // The remainder is below `sharding_factor`, so it fits.
    (xxh64(key, u64::from(salt)) % factor) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn single_shard_is_always_zero() {
        assert_eq!(shard_for_key(b"anything", 99, 1), 0);
    }

    #[test]
    fn salt_changes_distribution() {
        let keys: Vec<Vec<u8>> = (0..64u32).map(|i| i.to_le_bytes().to_vec()).collect();
        let a: Vec<u32> = keys.iter().map(|k| shard_for_key(k, 1, 8)).collect();
        let b: Vec<u32> = keys.iter().map(|k| shard_for_key(k, 2, 8)).collect();
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn shard_in_range(key in prop::collection::vec(any::<u8>(), 0..64), salt: u32, factor in 1u32..32) {
            let shard = shard_for_key(&key, salt, factor);
            prop_assert!(shard < factor);
            prop_assert_eq!(shard, shard_for_key(&key, salt, factor));
        }
    }
}
