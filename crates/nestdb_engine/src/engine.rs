//! Storage engine trait definitions.

use crate::error::{EngineError, EngineResult};
use crate::operation::{OpOutput, Operation};
use crate::schema::Schema;
use crate::types::{NativeId, TableSet, TransactionMode};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Callback invoked when a native transaction commits.
pub type CompleteCallback = Box<dyn FnOnce() + Send>;

/// Callback invoked when a native transaction aborts.
pub type AbortCallback = Box<dyn FnOnce(&EngineError) + Send>;

/// Terminal state of a native transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeOutcome {
    /// All writes were applied.
    Committed,
    /// All writes were discarded.
    Aborted(EngineError),
}

/// A host storage engine with object-store tables.
///
/// Engines own durability and isolation. NestDB only relies on the
/// transaction contract below.
///
/// # Invariants
///
/// - A native transaction is bound to a fixed table set and mode
/// - A native transaction commits on its own once a scheduler turn passes
///   without any operation being issued against it
/// - There is no commit call; `abort` is the only way to end one early
pub trait StorageEngine: Send + Sync {
    /// Returns the engine (database) name.
    fn name(&self) -> &str;

    /// Returns the declared tables.
    fn schema(&self) -> &Schema;

    /// Opens a native transaction over `tables` in `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if a table is unknown, the set is empty, or the engine
    /// cannot schedule the transaction.
    fn open_transaction(
        &self,
        tables: &TableSet,
        mode: TransactionMode,
    ) -> EngineResult<Arc<dyn NativeTransaction>>;
}

/// A native engine transaction.
pub trait NativeTransaction: Send + Sync {
    /// Returns the native transaction ID.
    fn id(&self) -> NativeId;

    /// Returns the tables in scope.
    fn tables(&self) -> &TableSet;

    /// Returns the access mode.
    fn mode(&self) -> TransactionMode;

    /// Issues an operation.
    ///
    /// Issuing counts as activity and postpones the idle auto-commit. Once the
    /// transaction has finished, the request fails with `TransactionInactive`.
    fn operate(&self, table: &str, op: Operation) -> EngineRequest;

    /// Registers a commit listener.
    fn on_complete(&self, callback: CompleteCallback);

    /// Registers an abort listener.
    fn on_abort(&self, callback: AbortCallback);

    /// Aborts the transaction, discarding its writes.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` if it already finished.
    fn abort(&self) -> EngineResult<()>;

    /// Returns the terminal state, or `None` while the transaction runs.
    fn outcome(&self) -> Option<NativeOutcome>;
}

/// The pending result of an issued operation.
#[derive(Debug)]
pub struct EngineRequest {
    state: RequestState,
}

#[derive(Debug)]
enum RequestState {
    Ready(Option<EngineResult<OpOutput>>),
    Pending(oneshot::Receiver<EngineResult<OpOutput>>),
}

impl EngineRequest {
    /// Creates a request whose result is already known.
    #[must_use]
    pub fn ready(result: EngineResult<OpOutput>) -> Self {
        Self {
            state: RequestState::Ready(Some(result)),
        }
    }

    /// Creates a request completed later through the returned sender.
    #[must_use]
    pub fn pending() -> (oneshot::Sender<EngineResult<OpOutput>>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                state: RequestState::Pending(rx),
            },
        )
    }

    /// Takes the result if it is already available.
    pub fn try_take(&mut self) -> Option<EngineResult<OpOutput>> {
        match &mut self.state {
            RequestState::Ready(result) => result.take(),
            RequestState::Pending(rx) => rx.try_recv().ok(),
        }
    }
}

impl Future for EngineRequest {
    type Output = EngineResult<OpOutput>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            RequestState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(EngineError::RequestConsumed)))
            }
            RequestState::Pending(rx) => Pin::new(rx).poll(cx).map(|received| {
                received.unwrap_or_else(|_| Err(EngineError::aborted("request dropped by engine")))
            }),
        }
    }
}

/// Returns a future that resolves once `txn` commits or aborts.
///
/// Resolves immediately for a transaction that already finished.
pub fn completion(txn: &dyn NativeTransaction) -> impl Future<Output = NativeOutcome> + Send {
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Some(tx)));

    let on_commit = Arc::clone(&slot);
    txn.on_complete(Box::new(move || {
        if let Some(tx) = on_commit.lock().take() {
            let _ = tx.send(NativeOutcome::Committed);
        }
    }));
    txn.on_abort(Box::new(move |err| {
        if let Some(tx) = slot.lock().take() {
            let _ = tx.send(NativeOutcome::Aborted(err.clone()));
        }
    }));

    async move {
        rx.await.unwrap_or_else(|_| {
            NativeOutcome::Aborted(EngineError::aborted("transaction dropped"))
        })
    }
}
