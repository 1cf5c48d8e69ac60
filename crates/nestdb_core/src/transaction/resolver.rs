//! Scope resolution for transaction requests.

use crate::error::{CoreError, CoreResult};
use crate::transaction::handle::TransactionHandle;
use crate::types::{DatabaseId, NestingPolicy, ScopeRequest, TransactionId};
use nestdb_engine::{TableSet, TransactionMode};

/// How a transaction request is served.
#[derive(Debug)]
pub(crate) enum Resolution {
    /// Open a new native transaction; nothing usable is ambient.
    Create,
    /// Join the ambient transaction as a co-reentrant child.
    Reuse(TransactionHandle),
    /// Open a new native transaction while the ambient one waits for it.
    Independent(TransactionHandle),
    /// Fail without running the body.
    Reject(CoreError),
}

/// Checks that a scope fits inside an enclosing one.
///
/// Fits when every requested table is in scope and the enclosing mode covers
/// the requested one.
///
/// # Errors
///
/// Returns `ScopeViolation` for the first table out of scope, otherwise
/// `ModeViolation` if a write scope is requested inside a read-only one.
pub(crate) fn check_compatible(
    enclosing_tables: &TableSet,
    enclosing_mode: TransactionMode,
    enclosing_id: TransactionId,
    tables: &TableSet,
    mode: TransactionMode,
) -> CoreResult<()> {
    if let Some(missing) = tables.first_missing_from(enclosing_tables) {
        return Err(CoreError::scope_violation(missing, enclosing_id));
    }
    if !enclosing_mode.covers(mode) {
        let table = tables.first().unwrap_or_default();
        return Err(CoreError::mode_violation(table, mode, enclosing_mode, enclosing_id));
    }
    Ok(())
}

/// Decides how `request` relates to the `ambient` transaction.
///
/// An ambient transaction that is no longer active is only ignored when the
/// request would not have joined it anyway. A request that would join it
/// fails instead of starting over in a fresh native transaction.
pub(crate) fn resolve(
    ambient: Option<TransactionHandle>,
    database: DatabaseId,
    request: &ScopeRequest,
) -> Resolution {
    let Some(ambient) = ambient else {
        return Resolution::Create;
    };
    let active = ambient.is_active();
    if ambient.database_id() != database || request.policy == NestingPolicy::Independent {
        return independent_of(ambient, active);
    }

    let fits = check_compatible(
        ambient.tables(),
        ambient.mode(),
        ambient.id(),
        &request.tables,
        request.mode,
    );
    match (request.policy, fits) {
        (_, Ok(())) if active => Resolution::Reuse(ambient),
        (_, Ok(())) => Resolution::Reject(ambient.inactive_error()),
        (NestingPolicy::Default, Err(err)) => Resolution::Reject(err),
        (_, Err(_)) => independent_of(ambient, active),
    }
}

fn independent_of(ambient: TransactionHandle, active: bool) -> Resolution {
    if active {
        Resolution::Independent(ambient)
    } else {
        Resolution::Create
    }
}
