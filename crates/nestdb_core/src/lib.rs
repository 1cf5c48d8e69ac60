//! # NestDB Core
//!
//! Nested transaction coordinator for NestDB.
//!
//! This crate provides:
//! - The ambient transaction context carried across `.await` and spawned
//!   continuations
//! - Scope resolution for nested transaction requests
//! - Transaction handles with reentrancy tracking and lifecycle hooks
//! - A keep-alive guard against premature auto-commit
//! - The operation gate and a small table API
//!
//! ## Example
//!
//! ```rust,ignore
//! use nestdb_core::{Database, current_transaction};
//! use nestdb_engine::Schema;
//! use serde_json::json;
//!
//! let schema = Schema::from_stores([("users", "username"), ("pets", "++id,kind")])?;
//! let db = Database::open_in_memory("app", schema);
//! let db = &db;
//!
//! db.transaction("rw", ["users", "pets"], |outer| async move {
//!     db.table("users")?.add(json!({"username": "arne"})).await?;
//!     db.transaction("rw", ["pets"], |_| async move {
//!         assert_eq!(outer.reentrancy_depth(), 1);
//!         db.table("pets")?.add(json!({"kind": "dog"})).await
//!     })
//!     .await?;
//!     Ok(())
//! })
//! .await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used)]

mod config;
mod database;
mod error;
mod gate;
mod request;
mod table;
mod transaction;
mod types;

pub use config::Config;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use request::Request;
pub use table::Table;
pub use transaction::{
    bind, current_transaction, run_with, spawn, AbortWaiter, CompleteWaiter, Continuation,
    HandleState, TransactionHandle, TransactionManager,
};
pub use types::{DatabaseId, ModeSpec, NestingPolicy, ScopeRequest, TransactionId};

pub use nestdb_engine::{Key, TableSet, TransactionMode};
