//! # NestDB Testkit
//!
//! Test utilities for NestDB.
//!
//! This crate provides:
//! - Test fixtures: databases over the in-memory engine with the standard
//!   `users` / `pets` / `petsPerUser` schema, and a `log` database
//! - Property-based test generators using proptest
//! - Logging setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nestdb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_database() {
//!     let db = TestDatabase::memory();
//!     db.transaction("rw", ["users"], |_| async { Ok(()) }).await.unwrap();
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
