//! Error types for NestDB core.

use crate::types::TransactionId;
use nestdb_engine::{EngineError, Key, TransactionMode};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in NestDB core operations.
///
/// Errors are `Clone`: when a transaction group aborts, the same reason is
/// recorded on every handle in the group.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Operation or nested scope touches a table outside the active scope.
    #[error("table {table} is not part of transaction {txn}")]
    ScopeViolation {
        /// The offending table.
        table: String,
        /// The active transaction.
        txn: TransactionId,
    },

    /// Write attempted under a read-only scope.
    #[error("{requested} access to {table} not allowed in {mode} transaction {txn}")]
    ModeViolation {
        /// The offending table.
        table: String,
        /// Mode the operation or nested scope needs.
        requested: TransactionMode,
        /// Mode of the active transaction.
        mode: TransactionMode,
        /// The active transaction.
        txn: TransactionId,
    },

    /// The transaction's native transaction has already committed or aborted.
    #[error("transaction is no longer active: {reason}")]
    TransactionInactive {
        /// What made it inactive.
        reason: String,
    },

    /// Engine-reported data integrity failure.
    #[error("constraint violation: key {key} already exists in table {table}")]
    ConstraintViolation {
        /// The table being written.
        table: String,
        /// The conflicting key.
        key: Key,
    },

    /// The transaction was aborted on request.
    #[error("transaction {txn} aborted on request")]
    AbortRequested {
        /// The transaction whose `abort()` was called.
        txn: TransactionId,
    },

    /// Another handle sharing the native transaction aborted it.
    #[error("transaction aborted by {origin}: {cause}")]
    ChildAbortPropagated {
        /// The handle that caused the abort.
        origin: TransactionId,
        /// The error that caused the abort.
        #[source]
        cause: Box<CoreError>,
    },

    /// Any other engine error.
    #[error("engine error: {0}")]
    Engine(EngineError),

    /// The table is not declared in the schema.
    #[error("unknown table: {name}")]
    UnknownTable {
        /// Name of the table.
        name: String,
    },

    /// A mode string could not be parsed.
    #[error("invalid transaction mode: {spec:?}")]
    InvalidMode {
        /// The rejected mode string.
        spec: String,
    },

    /// Too many co-reentrant levels.
    #[error("nesting depth {depth} exceeds the configured maximum")]
    NestingTooDeep {
        /// Depth that was requested.
        depth: usize,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// A detached continuation failed outside of its body (e.g. panicked).
    #[error("task failed: {message}")]
    TaskFailed {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a scope violation error.
    pub fn scope_violation(table: impl Into<String>, txn: TransactionId) -> Self {
        Self::ScopeViolation {
            table: table.into(),
            txn,
        }
    }

    /// Creates a mode violation error.
    pub fn mode_violation(
        table: impl Into<String>,
        requested: TransactionMode,
        mode: TransactionMode,
        txn: TransactionId,
    ) -> Self {
        Self::ModeViolation {
            table: table.into(),
            requested,
            mode,
            txn,
        }
    }

    /// Creates a transaction inactive error.
    pub fn inactive(reason: impl Into<String>) -> Self {
        Self::TransactionInactive {
            reason: reason.into(),
        }
    }

    /// Wraps an error raised by another member of a transaction group.
    pub fn child_abort(origin: TransactionId, cause: CoreError) -> Self {
        Self::ChildAbortPropagated {
            origin,
            cause: Box::new(cause),
        }
    }

    /// Creates a task failed error.
    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::TaskFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Follows `ChildAbortPropagated` links to the original error.
    #[must_use]
    pub fn root_cause(&self) -> &CoreError {
        match self {
            Self::ChildAbortPropagated { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Returns true if the root cause is a constraint violation.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self.root_cause(), Self::ConstraintViolation { .. })
    }

    /// Returns true if the root cause is an explicit abort.
    #[must_use]
    pub fn is_abort_requested(&self) -> bool {
        matches!(self.root_cause(), Self::AbortRequested { .. })
    }
}

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ConstraintViolation { table, key } => {
                Self::ConstraintViolation { table, key }
            }
            EngineError::TransactionInactive { native } => {
                Self::inactive(format!("{native} already finished"))
            }
            EngineError::UnknownTable { name } => Self::UnknownTable { name },
            other => Self::Engine(other),
        }
    }
}
