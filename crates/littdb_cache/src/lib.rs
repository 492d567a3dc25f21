//! # LittDB Cache
//!
//! Generic, weight-bounded key/value caches.
//!
//! This crate is a leaf: it knows nothing about segments, keymaps or tables.
//! LittDB uses it internally to front tables, and embedding applications can
//! use it directly.
//!
//! ## Design Principles
//!
//! - Capacity is measured in caller-defined *weight*, not entry count
//! - A single item heavier than the whole cache is dropped, never forcing a
//!   full flush of the cache
//! - Eviction policy and thread safety are separate layers
//!
//! ## Available Caches
//!
//! - [`FifoCache`] - Insertion-order eviction (reads never promote)
//! - [`TieredCache`] - A hot FIFO tier that demotes into a soft secondary tier
//! - [`ThreadSafeCache`] - Wraps any [`Cache`] behind a reader/writer lock
//!
//! ## Example
//!
//! ```rust
//! use littdb_cache::{Cache, FifoCache};
//!
//! let mut cache = FifoCache::with_weigher(10, |_k: &u32, v: &String| v.len() as u64);
//! cache.put(1, "hello".to_string());
//! cache.put(2, "world".to_string());
//! cache.put(3, "!".to_string());
//!
//! // "hello" was inserted first and is evicted to make room.
//! assert!(cache.get(&1).is_none());
//! assert_eq!(cache.weight(), 6);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod fifo;
mod metrics;
mod thread_safe;
mod tiered;

pub use cache::{unit_weight, Cache, SharedCache, WeightFn};
pub use fifo::FifoCache;
pub use metrics::CacheMetrics;
pub use thread_safe::ThreadSafeCache;
pub use tiered::TieredCache;
