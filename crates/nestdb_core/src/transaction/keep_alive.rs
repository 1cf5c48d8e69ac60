//! Keep-alive guard.
//!
//! A native transaction commits as soon as a scheduler turn passes without
//! activity. While the root of a group still has nested bodies or detached
//! continuations outstanding, this task touches the native transaction once
//! per turn so that the engine never sees an idle turn.

use crate::transaction::handle::TransactionHandle;
use tokio::task::JoinHandle;
use tracing::trace;

/// Spawns the guard for `root`.
///
/// The task ends by itself once the root is gone or its native transaction
/// finished; the owning group aborts it when the root starts completing.
pub(crate) fn spawn(root: &TransactionHandle) -> JoinHandle<()> {
    let root = root.downgrade();
    tokio::spawn(async move {
        loop {
            tokio::task::yield_now().await;
            let Some(inner) = root.upgrade() else {
                return;
            };
            let root = TransactionHandle::from_inner(inner);
            if root.native().outcome().is_some() {
                return;
            }
            if root.is_busy() {
                trace!(
                    txn = %root.id(),
                    depth = root.reentrancy_depth(),
                    pending = root.pending_continuations(),
                    "keep-alive tick"
                );
                root.group().touch();
            }
        }
    })
}
