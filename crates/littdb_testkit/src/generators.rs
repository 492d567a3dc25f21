//! Property-based test generators using proptest.

use bytes::Bytes;
use littdb_core::{Address, KVPair, KeymapType};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating keys (never empty).
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..64)
}

/// Strategy for generating values, including empty ones.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

/// Strategy for generating valid table names.
pub fn table_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_-]{1,32}").expect("Invalid regex")
}

/// Strategy for generating addresses.
pub fn address_strategy() -> impl Strategy<Value = Address> {
    (any::<u32>(), any::<u32>()).prop_map(|(segment, offset)| Address::new(segment, offset))
}

/// Strategy for generating a batch of pairs with distinct keys.
pub fn unique_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<KVPair>> {
    prop::collection::btree_map(key_strategy(), value_strategy(), 1..=max_len.max(1)).prop_map(
        |entries: BTreeMap<Vec<u8>, Vec<u8>>| {
            entries
                .into_iter()
                .map(|(key, value)| KVPair::new(key, value))
                .collect()
        },
    )
}

/// Strategy for generating any keymap type.
pub fn keymap_type_strategy() -> impl Strategy<Value = KeymapType> {
    prop_oneof![
        Just(KeymapType::InMemory),
        Just(KeymapType::Redb),
        Just(KeymapType::RedbUnsafe),
    ]
}

/// Every ordered pair of distinct keymap types, for migration tests.
pub fn keymap_type_switches() -> Vec<(KeymapType, KeymapType)> {
    let all = [KeymapType::InMemory, KeymapType::Redb, KeymapType::RedbUnsafe];
    all.iter()
        .flat_map(|from| all.iter().map(move |to| (*from, *to)))
        .filter(|(from, to)| from != to)
        .collect()
}

/// Deterministic value for key number `i`, for bulk tests.
pub fn sample_value(i: u64, len: usize) -> Bytes {
    let seed = i.to_le_bytes();
    Bytes::from((0..len).map(|j| seed[j % seed.len()] ^ (j as u8)).collect::<Vec<u8>>())
}
