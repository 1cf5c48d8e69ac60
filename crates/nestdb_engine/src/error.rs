//! Error types for engine operations.

use crate::key::Key;
use crate::types::NativeId;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by a storage engine.
///
/// Engine errors are `Clone` because a single abort reason is delivered to
/// every listener registered on a native transaction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A write would violate a key constraint (e.g. duplicate primary key).
    #[error("constraint violation: key {key} already exists in table {table}")]
    ConstraintViolation {
        /// The table being written.
        table: String,
        /// The conflicting key.
        key: Key,
    },

    /// The native transaction has already committed or aborted.
    #[error("transaction {native} is no longer active")]
    TransactionInactive {
        /// The finished native transaction.
        native: NativeId,
    },

    /// A write was issued against a read-only native transaction.
    #[error("table {table} is read-only in transaction {native}")]
    ReadOnly {
        /// The table being written.
        table: String,
        /// The read-only native transaction.
        native: NativeId,
    },

    /// The table is not part of the native transaction's scope.
    #[error("table {table} is not part of transaction {native}")]
    NotInScope {
        /// The requested table.
        table: String,
        /// The native transaction.
        native: NativeId,
    },

    /// The table is not declared in the schema.
    #[error("unknown table: {name}")]
    UnknownTable {
        /// Name of the table.
        name: String,
    },

    /// A key could not be derived or is malformed.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// A schema declaration could not be parsed.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// A transaction scope is malformed.
    #[error("invalid scope: {message}")]
    InvalidScope {
        /// Description of the problem.
        message: String,
    },

    /// The native transaction was aborted.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Reason for the abort.
        reason: String,
    },

    /// A request result was consumed twice.
    #[error("request already consumed")]
    RequestConsumed,

    /// No async runtime is available to drive the engine.
    #[error("no async runtime available")]
    NoRuntime,
}

impl EngineError {
    /// Creates a transaction inactive error.
    pub fn inactive(native: NativeId) -> Self {
        Self::TransactionInactive { native }
    }

    /// Creates an aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an invalid scope error.
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates an unknown table error.
    pub fn unknown_table(name: impl Into<String>) -> Self {
        Self::UnknownTable { name: name.into() }
    }
}
