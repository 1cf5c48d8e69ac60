//! Handles sharing one native transaction.

use crate::config::Config;
use crate::error::CoreError;
use crate::transaction::handle::TransactionHandle;
use crate::transaction::keep_alive;
use crate::types::TransactionId;
use nestdb_engine::{EngineError, NativeTransaction, Operation};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Final state of a native transaction as seen by its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupOutcome {
    Committed,
    Aborted,
}

/// The root handle of a native transaction plus every co-reentrant child
/// that joined it.
///
/// The group owns the native transaction, listens for its outcome, and
/// delivers aborts to all members. The first abort cause wins.
pub(crate) struct NativeGroup {
    native: Arc<dyn NativeTransaction>,
    config: Config,
    state: Mutex<GroupState>,
    outcome: watch::Sender<Option<GroupOutcome>>,
}

#[derive(Default)]
struct GroupState {
    /// Strong until the group is released, so waiters registered on a
    /// dropped handle still fire.
    members: Vec<TransactionHandle>,
    abort_cause: Option<CoreError>,
    keep_alive: Option<JoinHandle<()>>,
}

impl NativeGroup {
    pub(crate) fn new(native: Arc<dyn NativeTransaction>, config: Config) -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            native,
            config,
            state: Mutex::new(GroupState::default()),
            outcome,
        })
    }

    pub(crate) fn native(&self) -> &Arc<dyn NativeTransaction> {
        &self.native
    }

    pub(crate) fn aborts_on_unhandled(&self) -> bool {
        self.config.abort_on_unhandled
    }

    pub(crate) fn register(&self, handle: &TransactionHandle) {
        self.state.lock().members.push(handle.clone());
    }

    /// Drops the member list once the group's outcome is settled.
    pub(crate) fn release(&self) {
        let members = std::mem::take(&mut self.state.lock().members);
        trace!(native = %self.native.id(), members = members.len(), "transaction group released");
    }

    /// Subscribes to the native transaction's outcome.
    pub(crate) fn install(self: &Arc<Self>) {
        let group = Arc::downgrade(self);
        self.native.on_complete(Box::new(move || {
            if let Some(group) = group.upgrade() {
                group.native_committed();
            }
        }));
        let group = Arc::downgrade(self);
        self.native.on_abort(Box::new(move |err| {
            if let Some(group) = group.upgrade() {
                group.native_aborted(err);
            }
        }));
    }

    /// Starts the keep-alive guard for `root`, if configured.
    pub(crate) fn start_keep_alive(&self, root: &TransactionHandle) {
        if !self.config.keep_alive {
            return;
        }
        let task = keep_alive::spawn(root);
        if let Some(previous) = self.state.lock().keep_alive.replace(task) {
            previous.abort();
        }
    }

    pub(crate) fn stop_keep_alive(&self) {
        if let Some(task) = self.state.lock().keep_alive.take() {
            task.abort();
            trace!(native = %self.native.id(), "keep-alive stopped");
        }
    }

    /// Issues a harmless read so the engine sees activity this turn.
    pub(crate) fn touch(&self) {
        if !self.config.keep_alive || self.native.outcome().is_some() {
            return;
        }
        if let Some(table) = self.native.tables().first() {
            let _ = self.native.operate(table, Operation::Count);
            trace!(native = %self.native.id(), table, "native transaction touched");
        }
    }

    /// Aborts every member and the native transaction.
    ///
    /// `origin` is the handle that caused the abort; it records `cause`
    /// itself, every other member records `ChildAbortPropagated`. Without an
    /// origin every member records `cause`.
    pub(crate) fn abort(&self, origin: Option<TransactionId>, cause: CoreError) {
        let members = {
            let mut state = self.state.lock();
            if state.abort_cause.is_some() {
                return;
            }
            state.abort_cause = Some(cause.clone());
            if let Some(task) = state.keep_alive.take() {
                task.abort();
            }
            state.members.clone()
        };
        debug!(
            native = %self.native.id(),
            origin = ?origin.map(|id| id.as_u64()),
            error = %cause,
            "aborting transaction group"
        );

        for member in members {
            let reason = match origin {
                Some(origin) if origin != member.id() => CoreError::child_abort(origin, cause.clone()),
                _ => cause.clone(),
            };
            member.mark_aborted(reason);
        }

        if let Err(err) = self.native.abort() {
            debug!(native = %self.native.id(), error = %err, "native transaction already finished");
        }
    }

    /// Resolves once the native transaction committed or aborted.
    pub(crate) async fn finished(&self) -> GroupOutcome {
        let mut outcome = self.outcome.subscribe();
        loop {
            let seen = *outcome.borrow_and_update();
            if let Some(seen) = seen {
                return seen;
            }
            if outcome.changed().await.is_err() {
                return GroupOutcome::Aborted;
            }
        }
    }

    fn members(&self) -> Vec<TransactionHandle> {
        self.state.lock().members.clone()
    }

    fn native_committed(&self) {
        self.stop_keep_alive();
        debug!(native = %self.native.id(), "transaction group committed");
        for member in self.members() {
            member.native_committed();
        }
        self.outcome.send_replace(Some(GroupOutcome::Committed));
    }

    fn native_aborted(&self, err: &EngineError) {
        let external = self.state.lock().abort_cause.is_none();
        if external {
            debug!(native = %self.native.id(), error = %err, "native transaction aborted by the engine");
            self.abort(None, CoreError::from(err.clone()));
        }
        self.outcome.send_replace(Some(GroupOutcome::Aborted));
    }
}
