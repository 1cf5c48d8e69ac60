//! # NestDB Engine
//!
//! Storage engine boundary for NestDB.
//!
//! This crate defines what the transaction coordinator expects from a host
//! engine and ships an in-memory reference engine.
//!
//! ## Engine Contract
//!
//! - Tables are object stores declared up front in a [`Schema`]
//! - A native transaction is scoped to a fixed [`TableSet`] and
//!   [`TransactionMode`]
//! - A native transaction auto-commits once it sits idle for a scheduler turn;
//!   callers can only abort
//!
//! ## Example
//!
//! ```rust,ignore
//! use nestdb_engine::{completion, MemoryEngine, Operation, Schema, StorageEngine, TableSet, TransactionMode};
//! use serde_json::json;
//!
//! let engine = MemoryEngine::new("app", Schema::from_stores([("users", "username")])?);
//! let txn = engine.open_transaction(&TableSet::new(["users"]), TransactionMode::ReadWrite)?;
//! txn.operate("users", Operation::Add { key: None, value: json!({"username": "arne"}) }).await?;
//! completion(txn.as_ref()).await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used)]

mod config;
mod engine;
mod error;
mod key;
mod memory;
mod operation;
mod schema;
mod types;

pub use config::EngineConfig;
pub use engine::{
    completion, AbortCallback, CompleteCallback, EngineRequest, NativeOutcome,
    NativeTransaction, StorageEngine,
};
pub use error::{EngineError, EngineResult};
pub use key::Key;
pub use memory::{MemoryEngine, MemoryTransaction};
pub use operation::{OpOutput, Operation};
pub use schema::{PrimaryKey, Schema, StoreSpec};
pub use types::{NativeId, TableSet, TransactionMode};
