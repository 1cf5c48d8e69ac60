//! Operation gate.
//!
//! Every table operation passes through here. With a transaction of the same
//! database ambient, the operation is checked against its scope and mode and
//! issued in its native transaction. Otherwise it runs standalone in a
//! single-operation native transaction of its own.

use crate::database::DatabaseInner;
use crate::error::{CoreError, CoreResult};
use crate::request::{Decode, Request};
use crate::transaction::{current_transaction, TransactionHandle};
use crate::types::TransactionId;
use nestdb_engine::{completion, NativeOutcome, Operation, TableSet, TransactionMode};
use tracing::{debug, trace, warn};

/// Checks one operation against a transaction's scope.
///
/// # Errors
///
/// Returns `ScopeViolation` if `table` is not in `tables`, or
/// `ModeViolation` if a write is requested in a read-only transaction.
pub(crate) fn check_access(
    tables: &TableSet,
    mode: TransactionMode,
    txn: TransactionId,
    table: &str,
    requested: TransactionMode,
) -> CoreResult<()> {
    if !tables.contains(table) {
        return Err(CoreError::scope_violation(table, txn));
    }
    if !mode.covers(requested) {
        return Err(CoreError::mode_violation(table, requested, mode, txn));
    }
    Ok(())
}

/// Issues `op` against `table` in the ambient transaction or standalone.
pub(crate) fn issue<T>(db: &DatabaseInner, table: &str, op: Operation, decode: Decode<T>) -> Request<T>
where
    T: Send + 'static,
{
    if !db.is_open() {
        return Request::rejected(CoreError::DatabaseClosed, None);
    }
    match current_transaction() {
        Some(ambient) if ambient.database_id() == db.id() => issue_in(&ambient, table, op, decode),
        ambient => issue_standalone(db, ambient, table, op, decode),
    }
}

fn issue_in<T>(txn: &TransactionHandle, table: &str, op: Operation, decode: Decode<T>) -> Request<T> {
    if let Err(err) = check_access(txn.tables(), txn.mode(), txn.id(), table, op.required_mode()) {
        trace!(txn = %txn.id(), table, op = op.name(), error = %err, "operation refused");
        return Request::rejected(err, Some(txn.clone()));
    }
    if !txn.is_active() {
        let err = txn.inactive_error();
        trace!(txn = %txn.id(), table, op = op.name(), "operation on inactive transaction");
        return Request::rejected(err, Some(txn.clone()));
    }
    trace!(txn = %txn.id(), table, op = op.name(), "operation issued");
    Request::issued(txn.native().operate(table, op), decode, txn.clone())
}

/// Runs `op` in a native transaction scoped to `table` alone.
///
/// A transaction of another database that happens to be ambient waits for
/// the operation but does not share its fate.
fn issue_standalone<T>(
    db: &DatabaseInner,
    ambient: Option<TransactionHandle>,
    table: &str,
    op: Operation,
    decode: Decode<T>,
) -> Request<T>
where
    T: Send + 'static,
{
    let native = match db
        .engine()
        .open_transaction(&TableSet::new([table]), op.required_mode())
    {
        Ok(native) => native,
        Err(err) => return Request::rejected(err.into(), None),
    };
    debug!(native = %native.id(), table, op = op.name(), "standalone operation");

    let request = native.operate(table, op);
    let pending = ambient.as_ref().map(TransactionHandle::pending_guard);
    let table = table.to_string();
    Request::standalone(tokio::spawn(async move {
        let _pending = pending;
        let result = request.await.map_err(CoreError::from).and_then(decode);
        let outcome = completion(native.as_ref()).await;
        let result = match outcome {
            NativeOutcome::Committed => result,
            NativeOutcome::Aborted(reason) => result.and(Err(CoreError::from(reason))),
        };
        if let Err(err) = &result {
            warn!(native = %native.id(), table = %table, error = %err, "standalone operation failed");
        }
        result
    }))
}
