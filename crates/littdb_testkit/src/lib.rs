//! # LittDB Testkit
//!
//! Test utilities for LittDB.
//!
//! This crate provides:
//! - Temporary database and table fixtures
//! - Tracing initialization for tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use littdb_testkit::prelude::*;
//!
//! #[test]
//! fn writes_survive_restart() {
//!     let mut fixture = TestDb::started();
//!     let table = fixture.db().get_table("t").unwrap();
//!     table.put(b"k", b"v").unwrap();
//!     fixture.restart();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
