//! Table access.

use crate::database::DatabaseInner;
use crate::error::{CoreError, CoreResult};
use crate::gate;
use crate::request::Request;
use nestdb_engine::{Key, OpOutput, Operation};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A handle to one table of a database.
///
/// Every operation goes through the operation gate: inside a transaction of
/// the same database it is validated against that transaction's scope and
/// mode, otherwise it runs in a standalone single-operation transaction.
///
/// Operations return a [`Request`] that is already issued; awaiting it
/// yields the result.
#[derive(Clone)]
pub struct Table {
    db: Arc<DatabaseInner>,
    name: String,
}

impl Table {
    pub(crate) fn new(db: Arc<DatabaseInner>, name: &str) -> Self {
        Self {
            db,
            name: name.to_string(),
        }
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn issue<T: Send + 'static>(&self, op: Operation, decode: fn(OpOutput) -> CoreResult<T>) -> Request<T> {
        gate::issue(&self.db, &self.name, op, decode)
    }

    /// Inserts a value, failing with `ConstraintViolation` if its key exists.
    pub fn add(&self, value: Value) -> Request<Key> {
        self.issue(Operation::Add { key: None, value }, decode_key)
    }

    /// Inserts a value under an explicit key (out-of-line tables).
    pub fn add_with_key(&self, key: impl Into<Key>, value: Value) -> Request<Key> {
        self.issue(
            Operation::Add {
                key: Some(key.into()),
                value,
            },
            decode_key,
        )
    }

    /// Inserts or replaces a value.
    pub fn put(&self, value: Value) -> Request<Key> {
        self.issue(Operation::Put { key: None, value }, decode_key)
    }

    /// Inserts or replaces a value under an explicit key.
    pub fn put_with_key(&self, key: impl Into<Key>, value: Value) -> Request<Key> {
        self.issue(
            Operation::Put {
                key: Some(key.into()),
                value,
            },
            decode_key,
        )
    }

    /// Reads the value stored under `key`.
    pub fn get(&self, key: impl Into<Key>) -> Request<Option<Value>> {
        self.issue(Operation::Get(key.into()), |output| match output {
            OpOutput::Value(value) => Ok(value),
            other => Err(unexpected(&other)),
        })
    }

    /// Removes the value stored under `key`.
    pub fn delete(&self, key: impl Into<Key>) -> Request<()> {
        self.issue(Operation::Delete(key.into()), decode_done)
    }

    /// Removes every value.
    pub fn clear(&self) -> Request<()> {
        self.issue(Operation::Clear, decode_done)
    }

    /// Reads every value in key order.
    pub fn to_array(&self) -> Request<Vec<Value>> {
        self.issue(Operation::GetAll, |output| match output {
            OpOutput::Values(values) => Ok(values),
            other => Err(unexpected(&other)),
        })
    }

    /// Counts the stored values.
    pub fn count(&self) -> Request<u64> {
        self.issue(Operation::Count, |output| match output {
            OpOutput::Count(count) => Ok(count),
            other => Err(unexpected(&other)),
        })
    }
}

fn decode_key(output: OpOutput) -> CoreResult<Key> {
    match output {
        OpOutput::Key(key) => Ok(key),
        other => Err(unexpected(&other)),
    }
}

fn decode_done(output: OpOutput) -> CoreResult<()> {
    match output {
        OpOutput::Done => Ok(()),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(output: &OpOutput) -> CoreError {
    CoreError::invalid_operation(format!("unexpected engine output: {output:?}"))
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table").field("name", &self.name).finish()
    }
}
