//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use nestdb_core::{Config, Database};
use nestdb_engine::{EngineConfig, MemoryEngine, Schema};
use serde_json::{json, Value};
use std::sync::{Arc, Once};

/// Store specs of the standard test schema.
pub const TEST_STORES: [(&str, &str); 3] = [
    ("users", "username"),
    ("pets", "++id,kind"),
    ("petsPerUser", "++,user,pet"),
];

/// Store specs of the logging database.
pub const LOG_STORES: [(&str, &str); 1] = [("log", "++,time,type,message")];

/// Returns the standard test schema.
pub fn test_schema() -> Schema {
    Schema::from_stores(TEST_STORES).expect("Invalid test schema")
}

/// A test database over an in-memory engine.
///
/// Keeps the engine reachable so tests can inspect committed state without
/// opening a transaction.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The engine behind it.
    pub engine: Arc<MemoryEngine>,
}

impl TestDatabase {
    /// Creates a database with the standard schema and default config.
    pub fn memory() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a database with the standard schema and `config`.
    pub fn with_config(config: Config) -> Self {
        Self::build("TestDB", test_schema(), EngineConfig::default(), config)
    }

    /// Creates the logging database.
    pub fn logger() -> Self {
        let schema = Schema::from_stores(LOG_STORES).expect("Invalid log schema");
        Self::build("logger", schema, EngineConfig::default(), Config::default())
    }

    /// Creates a database from all parts.
    pub fn build(name: &str, schema: Schema, engine_config: EngineConfig, config: Config) -> Self {
        let engine = Arc::new(MemoryEngine::with_config(name, schema, engine_config));
        let db = Database::open(engine.clone(), config);
        Self { db, engine }
    }

    /// Returns the number of committed rows in `table`.
    pub fn committed_len(&self, table: &str) -> usize {
        self.engine
            .committed_len(table)
            .expect("Table not in schema")
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Returns a user value.
pub fn user(username: &str) -> Value {
    json!({ "username": username })
}

/// Returns a pet value.
pub fn pet(kind: &str) -> Value {
    json!({ "kind": kind })
}

/// Returns a log entry value.
pub fn log_entry(kind: &str, message: &str) -> Value {
    json!({ "time": 0, "type": kind, "message": message })
}

/// Installs a `tracing` subscriber for tests, once per process.
///
/// Honors `RUST_LOG`; defaults to warnings only.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
