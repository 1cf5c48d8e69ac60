//! Ambient transaction propagation.
//!
//! The ambient transaction follows the logical call chain rather than the
//! thread: it is stored in a Tokio task-local that is set for the duration of
//! a transaction body, inherited by everything the body awaits, and carried
//! into continuations started with [`spawn`].

use crate::error::{CoreError, CoreResult};
use crate::transaction::handle::TransactionHandle;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::futures::TaskLocalFuture;
use tokio::task::JoinHandle;

tokio::task_local! {
    static CURRENT: Option<TransactionHandle>;
}

/// Returns the transaction that is ambient for the running code, if any.
#[must_use]
pub fn current_transaction() -> Option<TransactionHandle> {
    CURRENT.try_with(Clone::clone).ok().flatten()
}

/// Runs `future` with `handle` as the ambient transaction.
///
/// The previous ambient value is restored when the future completes, fails,
/// or is dropped.
pub async fn run_with<F: Future>(handle: Option<TransactionHandle>, future: F) -> F::Output {
    CURRENT.scope(handle, future).await
}

/// Wraps `future` so that it runs with the current ambient transaction,
/// wherever it is eventually polled.
pub fn bind<F: Future>(future: F) -> TaskLocalFuture<Option<TransactionHandle>, F> {
    CURRENT.scope(current_transaction(), future)
}

/// Spawns a continuation that keeps the current ambient transaction.
///
/// While the continuation runs, the ambient transaction counts it as pending
/// work: it will not complete before the continuation finishes, and the
/// keep-alive guard holds its native transaction open.
///
/// A failure is unhandled only if nobody observes it. Awaiting the returned
/// [`Continuation`] observes the result. Dropping it detaches the task, and a
/// failure that was or will be produced without an observer aborts the
/// ambient transaction.
pub fn spawn<F, T>(future: F) -> Continuation<T>
where
    F: Future<Output = CoreResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let current = current_transaction();
    let pending = current.as_ref().map(TransactionHandle::pending_guard);
    let watch = Arc::new(Mutex::new(Observation::default()));
    let owner = current.clone();
    let task_owner = current.clone();
    let task_watch = Arc::clone(&watch);

    let task = tokio::spawn(CURRENT.scope(current, async move {
        let result = future.await;
        if let (Err(err), Some(owner)) = (&result, &task_owner) {
            let mut watch = task_watch.lock();
            if watch.detached {
                drop(watch);
                owner.reject_unhandled(err.clone());
            } else {
                watch.unobserved = Some(err.clone());
            }
        }
        drop(pending);
        result
    }));

    Continuation { task, watch, owner }
}

#[derive(Default)]
struct Observation {
    detached: bool,
    unobserved: Option<CoreError>,
}

/// A continuation started with [`spawn`].
///
/// Awaiting it yields the continuation's result. Dropping it detaches the
/// task, which keeps running.
pub struct Continuation<T> {
    task: JoinHandle<CoreResult<T>>,
    watch: Arc<Mutex<Observation>>,
    owner: Option<TransactionHandle>,
}

impl<T> Continuation<T> {
    /// Returns true if the continuation has finished running.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Future for Continuation<T> {
    type Output = CoreResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.task).poll(cx) {
            Poll::Ready(joined) => {
                this.watch.lock().unobserved = None;
                Poll::Ready(joined.unwrap_or_else(|err| Err(join_failure(&err))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Continuation<T> {
    fn drop(&mut self) {
        let failure = {
            let mut watch = self.watch.lock();
            watch.detached = true;
            watch.unobserved.take()
        };
        if let (Some(err), Some(owner)) = (failure, self.owner.take()) {
            owner.reject_unhandled(err);
        }
    }
}

impl<T> fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("finished", &self.task.is_finished())
            .field("owner", &self.owner.as_ref().map(TransactionHandle::id))
            .finish()
    }
}

/// Runs a transaction body with `handle` ambient.
///
/// The body closure itself is invoked inside the scope too, so code that runs
/// before its first `.await` already observes the handle.
pub(crate) async fn run_body<T, F, Fut>(handle: &TransactionHandle, body: F) -> CoreResult<T>
where
    F: FnOnce(TransactionHandle) -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let future = CURRENT.sync_scope(Some(handle.clone()), || body(handle.clone()));
    CURRENT.scope(Some(handle.clone()), future).await
}

/// Converts a join failure of a detached continuation.
pub(crate) fn join_failure(err: &tokio::task::JoinError) -> CoreError {
    if err.is_cancelled() {
        CoreError::task_failed("continuation was cancelled")
    } else {
        CoreError::task_failed(format!("continuation panicked: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_ambient_transaction_outside_a_scope() {
        assert!(current_transaction().is_none());
        let seen = run_with(None, async { current_transaction().is_none() }).await;
        assert!(seen);
    }

    #[tokio::test]
    async fn spawn_without_ambient_transaction_runs_plainly() {
        let value = spawn(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn spawn_failure_without_owner_is_returned() {
        let result = spawn(async { Err::<(), _>(CoreError::DatabaseClosed) }).await;
        assert_eq!(result, Err(CoreError::DatabaseClosed));
    }

    #[tokio::test]
    async fn panicking_continuation_reports_a_task_failure() {
        let result = spawn(async {
            if current_transaction().is_none() {
                panic!("boom");
            }
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(CoreError::TaskFailed { .. })));
    }
}
