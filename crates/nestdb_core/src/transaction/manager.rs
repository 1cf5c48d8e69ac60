//! Transaction manager.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::transaction::context::{current_transaction, run_body};
use crate::transaction::group::{GroupOutcome, NativeGroup};
use crate::transaction::handle::TransactionHandle;
use crate::transaction::resolver::{resolve, Resolution};
use crate::types::{DatabaseId, ScopeRequest, TransactionId};
use nestdb_engine::StorageEngine;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Runs transaction requests for one database.
///
/// The transaction manager provides:
/// - Scope resolution against the ambient transaction
/// - Co-reentrant nesting on a shared native transaction
/// - Independent transactions that do not share fate with their creator
/// - Settlement: a request resolves only once its transaction finished
pub struct TransactionManager {
    /// Database this manager belongs to.
    database: DatabaseId,
    /// Host engine.
    engine: Arc<dyn StorageEngine>,
    /// Coordinator settings.
    config: Config,
    /// Next transaction ID.
    next_txid: AtomicU64,
}

impl TransactionManager {
    /// Creates a new transaction manager.
    pub fn new(database: DatabaseId, engine: Arc<dyn StorageEngine>, config: Config) -> Self {
        Self {
            database,
            engine,
            config,
            next_txid: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> TransactionId {
        TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst))
    }

    /// Runs `body` inside a transaction resolved for `request`.
    ///
    /// # Errors
    ///
    /// Returns the body's error if it failed, the abort reason if the
    /// transaction aborted, or a scope/mode violation if the request does
    /// not fit the ambient transaction.
    pub async fn run<T, F, Fut>(&self, request: ScopeRequest, body: F) -> CoreResult<T>
    where
        F: FnOnce(TransactionHandle) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        if request.tables.is_empty() {
            return Err(CoreError::invalid_operation(
                "transaction needs at least one table",
            ));
        }
        let schema = self.engine.schema();
        if let Some(name) = request.tables.iter().find(|name| !schema.contains(name)) {
            return Err(CoreError::UnknownTable {
                name: name.to_string(),
            });
        }

        match resolve(current_transaction(), self.database, &request) {
            Resolution::Create => self.run_root(request, body).await,
            Resolution::Independent(ambient) => {
                debug!(ambient = %ambient.id(), tables = %request.tables, "independent transaction requested");
                let _pending = ambient.pending_guard();
                self.run_root(request, body).await
            }
            Resolution::Reuse(parent) => self.run_nested(parent, request, body).await,
            Resolution::Reject(err) => {
                debug!(error = %err, "nested transaction rejected");
                Err(err)
            }
        }
    }

    async fn run_root<T, F, Fut>(&self, request: ScopeRequest, body: F) -> CoreResult<T>
    where
        F: FnOnce(TransactionHandle) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let native = self.engine.open_transaction(&request.tables, request.mode)?;
        let group = NativeGroup::new(native, self.config.clone());
        let handle = TransactionHandle::root(
            self.next_id(),
            self.database,
            request.tables,
            request.mode,
            Arc::clone(&group),
        );
        let _release = ReleaseOnDrop(Arc::clone(&group));
        group.install();
        group.start_keep_alive(&handle);
        debug!(
            txn = %handle.id(),
            native = %handle.native_id(),
            tables = %handle.tables(),
            mode = %handle.mode(),
            "transaction started"
        );

        let result = run_body(&handle, body).await;

        match result {
            Err(err) => {
                handle.abort_with(err.clone());
                group.finished().await;
                Err(err)
            }
            Ok(value) => {
                handle.wait_idle().await;
                handle.enter_completing();
                let outcome = group.finished().await;
                match handle.abort_reason() {
                    Some(reason) => Err(reason),
                    None if outcome == GroupOutcome::Committed => {
                        debug!(txn = %handle.id(), "transaction committed");
                        Ok(value)
                    }
                    None => Err(handle.inactive_error()),
                }
            }
        }
    }

    async fn run_nested<T, F, Fut>(
        &self,
        parent: TransactionHandle,
        request: ScopeRequest,
        body: F,
    ) -> CoreResult<T>
    where
        F: FnOnce(TransactionHandle) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let level = parent.level() + 1;
        if level > self.config.max_nesting_depth {
            return Err(CoreError::NestingTooDeep { depth: level });
        }

        let _reentrant = parent.enter();
        let handle = TransactionHandle::child(self.next_id(), &parent, request.tables, request.mode);
        debug!(
            txn = %handle.id(),
            parent = %parent.id(),
            depth = level,
            tables = %handle.tables(),
            mode = %handle.mode(),
            "nested transaction started"
        );

        match run_body(&handle, body).await {
            Err(err) => {
                handle.abort_with(err.clone());
                Err(err)
            }
            Ok(value) => {
                handle.wait_idle().await;
                match handle.abort_reason() {
                    Some(reason) => Err(reason),
                    None => {
                        handle.finish_child();
                        Ok(value)
                    }
                }
            }
        }
    }
}

/// Releases a group's members when its root run ends, even if cancelled.
struct ReleaseOnDrop(Arc<NativeGroup>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.release();
    }
}
