//! Table operations understood by every engine.

use crate::key::Key;
use crate::types::TransactionMode;
use serde_json::Value;

/// A single operation against one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Reads the value stored under a key.
    Get(Key),
    /// Reads every value in key order.
    GetAll,
    /// Counts stored values.
    Count,
    /// Inserts a value; fails if the key already exists.
    Add {
        /// Explicit key for out-of-line tables.
        key: Option<Key>,
        /// Value to store.
        value: Value,
    },
    /// Inserts or replaces a value.
    Put {
        /// Explicit key for out-of-line tables.
        key: Option<Key>,
        /// Value to store.
        value: Value,
    },
    /// Removes the value stored under a key.
    Delete(Key),
    /// Removes every value.
    Clear,
}

impl Operation {
    /// Returns true if the operation mutates the table.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Add { .. } | Self::Put { .. } | Self::Delete(_) | Self::Clear
        )
    }

    /// Returns the transaction mode the operation needs.
    #[must_use]
    pub const fn required_mode(&self) -> TransactionMode {
        if self.is_write() {
            TransactionMode::ReadWrite
        } else {
            TransactionMode::ReadOnly
        }
    }

    /// Returns a short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Get(_) => "get",
            Self::GetAll => "get_all",
            Self::Count => "count",
            Self::Add { .. } => "add",
            Self::Put { .. } => "put",
            Self::Delete(_) => "delete",
            Self::Clear => "clear",
        }
    }
}

/// Result payload of a successful operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutput {
    /// Result of `Get`.
    Value(Option<Value>),
    /// Result of `GetAll`.
    Values(Vec<Value>),
    /// Result of `Count`.
    Count(u64),
    /// Key written by `Add` or `Put`.
    Key(Key),
    /// Result of `Delete` and `Clear`.
    Done,
}
