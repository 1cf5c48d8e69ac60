//! Pending table operations.

use crate::error::{CoreError, CoreResult};
use crate::transaction::{join_failure, TransactionHandle};
use nestdb_engine::{EngineError, EngineRequest, OpOutput};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// Converts engine output into the caller-facing result type.
pub(crate) type Decode<T> = fn(OpOutput) -> CoreResult<T>;

/// The result of a table operation.
///
/// The operation is issued when the request is created, not when it is
/// awaited. Awaiting yields its result.
///
/// A request that fails and is dropped without being awaited or inspected
/// counts as an unhandled failure and aborts the transaction it was issued
/// in (see [`crate::Config::abort_on_unhandled`]).
#[must_use = "a failed request that is never awaited aborts its transaction"]
pub struct Request<T> {
    state: RequestState<T>,
    owner: Option<TransactionHandle>,
}

enum RequestState<T> {
    /// Refused before reaching the engine.
    Rejected(CoreError),
    /// Issued in the owner's native transaction.
    Issued {
        request: EngineRequest,
        decode: Decode<T>,
    },
    /// Running in its own single-operation native transaction.
    Standalone(JoinHandle<CoreResult<T>>),
    /// Result already handed out.
    Done,
}

impl<T> Unpin for Request<T> {}

impl<T> Request<T> {
    pub(crate) fn rejected(err: CoreError, owner: Option<TransactionHandle>) -> Self {
        Self {
            state: RequestState::Rejected(err),
            owner,
        }
    }

    pub(crate) fn issued(request: EngineRequest, decode: Decode<T>, owner: TransactionHandle) -> Self {
        Self {
            state: RequestState::Issued { request, decode },
            owner: Some(owner),
        }
    }

    pub(crate) fn standalone(task: JoinHandle<CoreResult<T>>) -> Self {
        Self {
            state: RequestState::Standalone(task),
            owner: None,
        }
    }

    /// Returns the transaction the operation was issued in.
    ///
    /// `None` for operations that ran standalone.
    #[must_use]
    pub fn transaction(&self) -> Option<&TransactionHandle> {
        self.owner.as_ref()
    }

    /// Returns true if the request was refused before reaching the engine.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self.state, RequestState::Rejected(_))
    }

    /// Takes the result if it is already available.
    ///
    /// Refused requests and operations the engine completed synchronously
    /// are available right away. Taking the result counts as observing it.
    pub fn try_take(&mut self) -> Option<CoreResult<T>> {
        match std::mem::replace(&mut self.state, RequestState::Done) {
            RequestState::Rejected(err) => Some(Err(err)),
            RequestState::Issued {
                mut request,
                decode,
            } => match request.try_take() {
                Some(result) => Some(result.map_err(CoreError::from).and_then(decode)),
                None => {
                    self.state = RequestState::Issued { request, decode };
                    None
                }
            },
            other => {
                self.state = other;
                None
            }
        }
    }
}

impl<T> Future for Request<T> {
    type Output = CoreResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, RequestState::Done) {
            RequestState::Rejected(err) => Poll::Ready(Err(err)),
            RequestState::Issued {
                mut request,
                decode,
            } => match Pin::new(&mut request).poll(cx) {
                Poll::Ready(result) => {
                    Poll::Ready(result.map_err(CoreError::from).and_then(decode))
                }
                Poll::Pending => {
                    this.state = RequestState::Issued { request, decode };
                    Poll::Pending
                }
            },
            RequestState::Standalone(mut task) => match Pin::new(&mut task).poll(cx) {
                Poll::Ready(joined) => {
                    Poll::Ready(joined.unwrap_or_else(|err| Err(join_failure(&err))))
                }
                Poll::Pending => {
                    this.state = RequestState::Standalone(task);
                    Poll::Pending
                }
            },
            RequestState::Done => Poll::Ready(Err(CoreError::Engine(EngineError::RequestConsumed))),
        }
    }
}

impl<T> Drop for Request<T> {
    fn drop(&mut self) {
        let Some(owner) = self.owner.take() else {
            return;
        };
        let failure = match &mut self.state {
            RequestState::Rejected(err) => Some(err.clone()),
            RequestState::Issued { request, .. } => match request.try_take() {
                Some(Err(err)) => Some(CoreError::from(err)),
                _ => None,
            },
            RequestState::Standalone(_) | RequestState::Done => None,
        };
        if let Some(err) = failure {
            owner.reject_unhandled(err);
        }
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            RequestState::Rejected(_) => "rejected",
            RequestState::Issued { .. } => "issued",
            RequestState::Standalone(_) => "standalone",
            RequestState::Done => "done",
        };
        f.debug_struct("Request")
            .field("state", &state)
            .field("owner", &self.owner.as_ref().map(TransactionHandle::id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_count(output: OpOutput) -> CoreResult<u64> {
        match output {
            OpOutput::Count(count) => Ok(count),
            other => Err(CoreError::invalid_operation(format!("unexpected output {other:?}"))),
        }
    }

    #[tokio::test]
    async fn rejected_request_fails_when_awaited() {
        let request: Request<u64> = Request::rejected(CoreError::DatabaseClosed, None);
        assert!(request.is_rejected());
        assert_eq!(request.await, Err(CoreError::DatabaseClosed));
    }

    #[tokio::test]
    async fn try_take_consumes_the_result() {
        let mut request: Request<u64> = Request::rejected(CoreError::DatabaseClosed, None);
        assert_eq!(request.try_take(), Some(Err(CoreError::DatabaseClosed)));
        assert_eq!(request.try_take(), None);
        assert!(!request.is_rejected());
    }

    #[tokio::test]
    async fn standalone_request_resolves_from_task() {
        let task = tokio::spawn(async { decode_count(OpOutput::Count(4)) });
        let request = Request::standalone(task);
        assert!(request.transaction().is_none());
        assert_eq!(request.await, Ok(4));
    }
}
