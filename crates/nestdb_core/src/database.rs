//! Database facade.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::table::Table;
use crate::transaction::{TransactionHandle, TransactionManager};
use crate::types::{DatabaseId, ScopeRequest};
use nestdb_engine::{MemoryEngine, Schema, StorageEngine};
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// The main database handle.
///
/// `Database` is the primary entry point for interacting with NestDB.
/// It provides:
/// - Table access through the operation gate
/// - Nested, reentrant transactions over a host storage engine
///
/// Handles are cheap to clone; clones refer to the same open instance.
///
/// # Transactions
///
/// ```rust,ignore
/// use nestdb_core::Database;
/// use serde_json::json;
///
/// let db = Database::open_in_memory("app", schema);
/// let db = &db;
/// db.transaction("rw", ["users", "pets"], |_| async move {
///     db.table("users")?.add(json!({"username": "arne"})).await?;
///
///     // Joins the outer transaction: both commit or abort together.
///     db.transaction("rw", ["pets"], |_| async move {
///         db.table("pets")?.add(json!({"kind": "dog"})).await
///     })
///     .await?;
///     Ok(())
/// })
/// .await?;
/// ```
///
/// # Mode strings
///
/// `"r"`/`"readonly"` and `"rw"`/`"readwrite"`, optionally suffixed with `!`
/// (always open an independent transaction) or `?` (join the ambient
/// transaction if it fits, otherwise open an independent one).
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
    /// Instance identity.
    id: DatabaseId,
    /// Host engine.
    engine: Arc<dyn StorageEngine>,
    /// Configuration.
    config: Config,
    /// Transaction manager.
    txn_manager: TransactionManager,
    /// Whether the database is open.
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a database over a host engine.
    #[must_use]
    pub fn open(engine: Arc<dyn StorageEngine>, config: Config) -> Self {
        let id = DatabaseId::new();
        debug!(db = %id, name = engine.name(), "database opened");
        Self {
            inner: Arc::new(DatabaseInner {
                id,
                txn_manager: TransactionManager::new(id, Arc::clone(&engine), config.clone()),
                engine,
                config,
                is_open: RwLock::new(true),
            }),
        }
    }

    /// Opens a database over a fresh in-memory engine.
    ///
    /// Useful for testing.
    #[must_use]
    pub fn open_in_memory(name: &str, schema: Schema) -> Self {
        Self::open(Arc::new(MemoryEngine::new(name, schema)), Config::default())
    }

    /// Returns the instance ID.
    #[must_use]
    pub fn id(&self) -> DatabaseId {
        self.inner.id
    }

    /// Returns the engine name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.engine.name()
    }

    /// Returns the declared tables.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.inner.engine.schema()
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns a handle to a table.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTable` if the schema does not declare it.
    pub fn table(&self, name: &str) -> CoreResult<Table> {
        if !self.schema().contains(name) {
            return Err(CoreError::UnknownTable {
                name: name.to_string(),
            });
        }
        Ok(Table::new(Arc::clone(&self.inner), name))
    }

    /// Runs `body` in a transaction over `tables`.
    ///
    /// The body receives the resolved handle and runs with it ambient. The
    /// returned future resolves only after the transaction finished:
    /// - `Ok` with the body's value once it committed
    /// - the body's error if the body failed (the transaction aborts)
    /// - the abort reason if it aborted for another reason
    ///
    /// # Errors
    ///
    /// Also fails with `InvalidMode` for a malformed mode string,
    /// `DatabaseClosed`, `UnknownTable`, or a scope/mode violation when a
    /// nested request does not fit the ambient transaction.
    pub async fn transaction<T, I, S, F, Fut>(&self, mode: &str, tables: I, body: F) -> CoreResult<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(TransactionHandle) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let request = ScopeRequest::parse(mode, tables)?;
        self.transaction_with(request, body).await
    }

    /// Runs `body` in a transaction described by `request`.
    ///
    /// # Errors
    ///
    /// See [`Database::transaction`].
    pub async fn transaction_with<T, F, Fut>(&self, request: ScopeRequest, body: F) -> CoreResult<T>
    where
        F: FnOnce(TransactionHandle) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        self.inner.ensure_open()?;
        self.inner.txn_manager.run(request, body).await
    }

    /// Closes the database.
    ///
    /// New transactions and operations fail with `DatabaseClosed`; running
    /// transactions finish normally.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.inner.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;
        debug!(db = %self.inner.id, "database closed");
        Ok(())
    }

    /// Returns whether the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

impl DatabaseInner {
    pub(crate) fn id(&self) -> DatabaseId {
        self.id
    }

    pub(crate) fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Ensures the database is open.
    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.inner.id)
            .field("name", &self.name())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}
