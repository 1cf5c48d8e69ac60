//! Transaction handles.

use crate::error::{CoreError, CoreResult};
use crate::transaction::group::NativeGroup;
use crate::types::{DatabaseId, TransactionId};
use nestdb_engine::{NativeId, NativeTransaction, TableSet, TransactionMode};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Callback invoked when a transaction's native transaction commits.
pub type CompleteWaiter = Box<dyn FnOnce() + Send>;

/// Callback invoked with the abort reason when a transaction aborts.
pub type AbortWaiter = Box<dyn FnOnce(&CoreError) + Send>;

/// Lifecycle state of a transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Body is running; operations are accepted.
    Active,
    /// Body settled; waiting for the native transaction to commit.
    Completing,
    /// Finished successfully.
    Committed,
    /// Finished with an abort reason.
    Aborted,
}

/// Outstanding work that keeps a handle from completing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Activity {
    depth: usize,
    pending: usize,
}

impl Activity {
    fn is_idle(&self) -> bool {
        self.depth == 0 && self.pending == 0
    }
}

/// A logical transaction.
///
/// Handles are cheap to clone. Several handles can share one native
/// transaction: a nested request that fits inside the ambient transaction
/// becomes a *co-reentrant child* of it, and the whole family commits or
/// aborts together.
///
/// # Lifecycle
///
/// ```text
/// Active -> Completing -> Committed
///      \            \
///       +------------+--> Aborted
/// ```
///
/// A handle only leaves `Active` once its reentrancy depth is back to zero
/// and no continuation spawned under it is still pending.
#[derive(Clone)]
pub struct TransactionHandle {
    inner: Arc<HandleInner>,
}

pub(crate) struct HandleInner {
    id: TransactionId,
    database: DatabaseId,
    tables: TableSet,
    mode: TransactionMode,
    /// Number of handles between this one and the group root.
    level: usize,
    parent: Option<Weak<HandleInner>>,
    group: Arc<NativeGroup>,
    core: Mutex<HandleCore>,
    activity: watch::Sender<Activity>,
}

struct HandleCore {
    state: HandleState,
    abort_reason: Option<CoreError>,
    /// Set once the native transaction committed and `on_complete` fired.
    completed: bool,
    on_complete: Vec<CompleteWaiter>,
    on_abort: Vec<AbortWaiter>,
}

impl TransactionHandle {
    fn new(
        id: TransactionId,
        database: DatabaseId,
        tables: TableSet,
        mode: TransactionMode,
        parent: Option<&TransactionHandle>,
        group: Arc<NativeGroup>,
    ) -> Self {
        let (activity, _) = watch::channel(Activity::default());
        let handle = Self {
            inner: Arc::new(HandleInner {
                id,
                database,
                tables,
                mode,
                level: parent.map_or(0, |parent| parent.inner.level + 1),
                parent: parent.map(|parent| Arc::downgrade(&parent.inner)),
                group,
                core: Mutex::new(HandleCore {
                    state: HandleState::Active,
                    abort_reason: None,
                    completed: false,
                    on_complete: Vec::new(),
                    on_abort: Vec::new(),
                }),
                activity,
            }),
        };
        handle.inner.group.register(&handle);
        handle
    }

    /// Creates the root handle of a new native transaction group.
    pub(crate) fn root(
        id: TransactionId,
        database: DatabaseId,
        tables: TableSet,
        mode: TransactionMode,
        group: Arc<NativeGroup>,
    ) -> Self {
        Self::new(id, database, tables, mode, None, group)
    }

    /// Creates a co-reentrant child sharing `parent`'s native transaction.
    pub(crate) fn child(
        id: TransactionId,
        parent: &TransactionHandle,
        tables: TableSet,
        mode: TransactionMode,
    ) -> Self {
        let group = Arc::clone(&parent.inner.group);
        Self::new(id, parent.inner.database, tables, mode, Some(parent), group)
    }

    pub(crate) fn from_inner(inner: Arc<HandleInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<HandleInner> {
        Arc::downgrade(&self.inner)
    }

    /// Returns the handle ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    /// Returns the tables in scope.
    #[must_use]
    pub fn tables(&self) -> &TableSet {
        &self.inner.tables
    }

    /// Returns the access mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    /// Returns the ID of the backing native transaction.
    #[must_use]
    pub fn native_id(&self) -> NativeId {
        self.inner.group.native().id()
    }

    /// Returns the handle this one was nested into, if it is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<TransactionHandle> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Self::from_inner)
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> HandleState {
        self.inner.core.lock().state
    }

    /// Returns the number of nested bodies currently reusing this handle.
    #[must_use]
    pub fn reentrancy_depth(&self) -> usize {
        self.inner.activity.borrow().depth
    }

    /// Returns the number of detached continuations still pending.
    #[must_use]
    pub fn pending_continuations(&self) -> usize {
        self.inner.activity.borrow().pending
    }

    /// Returns the recorded abort reason, if the handle aborted.
    #[must_use]
    pub fn abort_reason(&self) -> Option<CoreError> {
        self.inner.core.lock().abort_reason.clone()
    }

    /// Returns true if operations can still be issued through this handle.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == HandleState::Active && self.native().outcome().is_none()
    }

    /// Returns true if both handles share one native transaction.
    #[must_use]
    pub fn shares_native_with(&self, other: &TransactionHandle) -> bool {
        Arc::ptr_eq(&self.inner.group, &other.inner.group)
    }

    /// Aborts the transaction.
    ///
    /// Every handle sharing the native transaction aborts with it. This
    /// handle records `AbortRequested`; the others record
    /// `ChildAbortPropagated`.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` if the transaction already finished.
    pub fn abort(&self) -> CoreResult<()> {
        if !self.is_active() {
            return Err(self.inactive_error());
        }
        self.abort_with(CoreError::AbortRequested { txn: self.id() });
        Ok(())
    }

    /// Registers a callback for when the native transaction commits.
    ///
    /// Fires immediately if that already happened. A commit that happens
    /// while the body is still running also fires it: that is a premature
    /// completion and later operations will fail.
    pub fn on_complete(&self, waiter: impl FnOnce() + Send + 'static) {
        let mut core = self.inner.core.lock();
        if core.completed {
            drop(core);
            waiter();
        } else if core.state != HandleState::Aborted {
            core.on_complete.push(Box::new(waiter));
        }
    }

    /// Registers a callback for when the transaction aborts.
    ///
    /// Fires immediately with the recorded reason if that already happened.
    pub fn on_abort(&self, waiter: impl FnOnce(&CoreError) + Send + 'static) {
        let mut core = self.inner.core.lock();
        match core.abort_reason.clone() {
            Some(reason) => {
                drop(core);
                waiter(&reason);
            }
            None => core.on_abort.push(Box::new(waiter)),
        }
    }

    pub(crate) fn database_id(&self) -> DatabaseId {
        self.inner.database
    }

    pub(crate) fn level(&self) -> usize {
        self.inner.level
    }

    pub(crate) fn native(&self) -> &Arc<dyn NativeTransaction> {
        self.inner.group.native()
    }

    pub(crate) fn group(&self) -> &Arc<NativeGroup> {
        &self.inner.group
    }

    /// Returns true while nested bodies or continuations are outstanding.
    pub(crate) fn is_busy(&self) -> bool {
        !self.inner.activity.borrow().is_idle()
    }

    pub(crate) fn inactive_error(&self) -> CoreError {
        let core = self.inner.core.lock();
        if core.state == HandleState::Aborted {
            return CoreError::inactive(format!("transaction {} was aborted", self.id()));
        }
        drop(core);
        CoreError::inactive(format!(
            "transaction {} has already committed",
            self.id()
        ))
    }

    /// Marks a nested body as running on this handle and its ancestors.
    pub(crate) fn enter(&self) -> ReentrancyGuard {
        let mut chain = Vec::with_capacity(self.inner.level + 1);
        let mut next = Some(self.clone());
        while let Some(handle) = next {
            handle.inner.activity.send_modify(|activity| activity.depth += 1);
            next = handle.parent();
            chain.push(handle);
        }
        self.inner.group.touch();
        ReentrancyGuard { chain }
    }

    /// Marks a detached continuation as pending on this handle.
    pub(crate) fn pending_guard(&self) -> PendingGuard {
        self.inner
            .activity
            .send_modify(|activity| activity.pending += 1);
        self.inner.group.touch();
        PendingGuard {
            handle: self.clone(),
        }
    }

    /// Waits until no nested body or continuation is outstanding.
    pub(crate) async fn wait_idle(&self) {
        let mut activity = self.inner.activity.subscribe();
        loop {
            let idle = activity.borrow_and_update().is_idle();
            if idle || activity.changed().await.is_err() {
                return;
            }
        }
    }

    /// Aborts the whole group with this handle as the direct cause.
    pub(crate) fn abort_with(&self, cause: CoreError) {
        self.inner.group.abort(Some(self.id()), cause);
    }

    /// Handles a failure nobody observed.
    pub(crate) fn reject_unhandled(&self, err: CoreError) {
        let finished = matches!(
            self.state(),
            HandleState::Aborted | HandleState::Committed
        ) || self.native().outcome().is_some();
        if finished {
            debug!(txn = %self.id(), error = %err, "unhandled failure after transaction finished");
            return;
        }
        if !self.inner.group.aborts_on_unhandled() {
            warn!(txn = %self.id(), error = %err, "unhandled failure ignored");
            return;
        }
        warn!(txn = %self.id(), error = %err, "unhandled failure aborts transaction");
        self.abort_with(err);
    }

    /// Moves a root handle whose body settled into `Completing`.
    pub(crate) fn enter_completing(&self) {
        let mut core = self.inner.core.lock();
        if core.state != HandleState::Active {
            return;
        }
        core.state = if core.completed {
            HandleState::Committed
        } else {
            HandleState::Completing
        };
        drop(core);
        self.inner.group.stop_keep_alive();
        debug!(txn = %self.id(), "transaction completing");
    }

    /// Marks a co-reentrant child whose body settled as committed.
    ///
    /// Its `on_complete` waiters still fire only when the shared native
    /// transaction commits.
    pub(crate) fn finish_child(&self) {
        let mut core = self.inner.core.lock();
        if core.state == HandleState::Active {
            core.state = HandleState::Committed;
            debug!(txn = %self.id(), "nested transaction committed");
        }
    }

    pub(crate) fn mark_aborted(&self, reason: CoreError) {
        let waiters = {
            let mut core = self.inner.core.lock();
            let settled = core.completed && core.state != HandleState::Active;
            if core.state == HandleState::Aborted || settled {
                return;
            }
            core.state = HandleState::Aborted;
            core.abort_reason = Some(reason.clone());
            core.on_complete.clear();
            std::mem::take(&mut core.on_abort)
        };
        debug!(txn = %self.id(), %reason, "transaction aborted");
        for waiter in waiters {
            waiter(&reason);
        }
    }

    pub(crate) fn native_committed(&self) {
        let waiters = {
            let mut core = self.inner.core.lock();
            match core.state {
                HandleState::Aborted => return,
                HandleState::Active => {
                    warn!(
                        txn = %self.id(),
                        native = %self.native_id(),
                        "native transaction committed while the body was still running"
                    );
                }
                HandleState::Completing => core.state = HandleState::Committed,
                HandleState::Committed => {}
            }
            core.completed = true;
            core.on_abort.clear();
            std::mem::take(&mut core.on_complete)
        };
        for waiter in waiters {
            waiter();
        }
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.inner.id)
            .field("tables", &self.inner.tables)
            .field("mode", &self.inner.mode)
            .field("level", &self.inner.level)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Keeps a nested body registered on a handle chain.
///
/// Created when a nested request reuses the ambient transaction. Every
/// handle from the reused one up to the group root counts the body until the
/// guard drops, on whatever path the body exits.
pub(crate) struct ReentrancyGuard {
    chain: Vec<TransactionHandle>,
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        for handle in &self.chain {
            handle
                .inner
                .activity
                .send_modify(|activity| activity.depth = activity.depth.saturating_sub(1));
        }
    }
}

/// Keeps a detached continuation registered on a handle.
///
/// The count is kept on this handle only and never on its ancestors. A nested
/// run waits for its own handle to go idle before it releases its parent's
/// reentrancy depth, so the root stays busy until every descendant settles.
pub(crate) struct PendingGuard {
    handle: TransactionHandle,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.handle
            .inner
            .activity
            .send_modify(|activity| activity.pending = activity.pending.saturating_sub(1));
    }
}
