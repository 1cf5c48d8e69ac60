//! Nested transaction coordination.
//!
//! NestDB layers reentrant, nestable transactions on top of native engine
//! transactions that are bound to a fixed scope and commit on their own:
//! - **Ambient context**: the active transaction follows the logical call
//!   chain, including awaited futures and continuations started with
//!   [`spawn`]
//! - **Co-reentrant nesting**: a nested request that fits the ambient scope
//!   shares its native transaction
//! - **Independent nesting**: `!` (always) and `?` (when the scope does not
//!   fit) open a separate native transaction
//! - **Keep-alive**: the native transaction is held open while nested work is
//!   outstanding

mod context;
mod group;
mod handle;
mod keep_alive;
mod manager;
mod resolver;

pub use context::{bind, current_transaction, run_with, spawn, Continuation};
pub use handle::{AbortWaiter, CompleteWaiter, HandleState, TransactionHandle};
pub use manager::TransactionManager;

pub(crate) use context::join_failure;
