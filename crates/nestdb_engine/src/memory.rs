//! In-memory storage engine.

use crate::config::EngineConfig;
use crate::engine::{
    AbortCallback, CompleteCallback, EngineRequest, NativeOutcome, NativeTransaction,
    StorageEngine,
};
use crate::error::{EngineError, EngineResult};
use crate::key::Key;
use crate::operation::{OpOutput, Operation};
use crate::schema::{PrimaryKey, Schema};
use crate::types::{NativeId, TableSet, TransactionMode};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// An in-memory object-store engine.
///
/// Native transactions behave like those of browser object stores:
/// - writes land in a per-transaction overlay and are applied atomically on
///   commit
/// - reads see committed data plus the transaction's own overlay
/// - generated keys are drawn from the overlay, so an aborted transaction
///   leaves the table's key generator untouched
/// - a transaction commits by itself after `idle_turns` scheduler turns in
///   which nothing was issued against it
///
/// Idle detection runs on the current Tokio runtime, so transactions must
/// be opened from within one.
///
/// # Example
///
/// ```rust,ignore
/// use nestdb_engine::{MemoryEngine, Schema, StorageEngine, TableSet, TransactionMode};
///
/// let schema = Schema::from_stores([("users", "username")])?;
/// let engine = MemoryEngine::new("app", schema);
/// let txn = engine.open_transaction(&TableSet::new(["users"]), TransactionMode::ReadWrite)?;
/// ```
pub struct MemoryEngine {
    name: String,
    config: EngineConfig,
    schema: Schema,
    store: Arc<Mutex<Store>>,
    next_native: AtomicU64,
}

#[derive(Debug, Default)]
struct Store {
    tables: HashMap<String, TableData>,
}

#[derive(Debug)]
struct TableData {
    rows: BTreeMap<Key, Value>,
    next_key: i64,
}

impl Default for TableData {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_key: 1,
        }
    }
}

impl MemoryEngine {
    /// Creates an engine with default configuration.
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self::with_config(name, schema, EngineConfig::default())
    }

    /// Creates an engine with custom configuration.
    pub fn with_config(name: impl Into<String>, schema: Schema, config: EngineConfig) -> Self {
        let tables = schema
            .table_names()
            .map(|name| (name.to_string(), TableData::default()))
            .collect();
        Self {
            name: name.into(),
            config,
            schema,
            store: Arc::new(Mutex::new(Store { tables })),
            next_native: AtomicU64::new(1),
        }
    }

    /// Returns the number of committed rows in a table.
    ///
    /// Reads outside of any transaction; useful for tests and inspection.
    pub fn committed_len(&self, table: &str) -> EngineResult<usize> {
        self.store
            .lock()
            .tables
            .get(table)
            .map(|data| data.rows.len())
            .ok_or_else(|| EngineError::unknown_table(table))
    }
}

impl StorageEngine for MemoryEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn open_transaction(
        &self,
        tables: &TableSet,
        mode: TransactionMode,
    ) -> EngineResult<Arc<dyn NativeTransaction>> {
        if tables.is_empty() {
            return Err(EngineError::invalid_scope("transaction needs at least one table"));
        }
        if let Some(name) = tables.iter().find(|name| !self.schema.contains(name)) {
            return Err(EngineError::unknown_table(name));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let id = NativeId::new(self.next_native.fetch_add(1, Ordering::SeqCst));
        let txn = Arc::new(MemoryTransaction {
            id,
            tables: tables.clone(),
            mode,
            schema: self.schema.clone(),
            store: Arc::clone(&self.store),
            state: Mutex::new(NativeState::default()),
        });
        runtime.spawn(commit_when_idle(Arc::clone(&txn), self.config.idle_turns));

        debug!(native = %id, engine = %self.name, %tables, %mode, "native transaction opened");
        Ok(txn)
    }
}

/// Commits `txn` once it stays idle for `idle_turns` consecutive turns.
async fn commit_when_idle(txn: Arc<MemoryTransaction>, idle_turns: u32) {
    let mut idle = 0;
    loop {
        tokio::task::yield_now().await;
        match txn.observe_turn() {
            Turn::Finished => return,
            Turn::Busy => idle = 0,
            Turn::Idle => {
                idle += 1;
                if idle >= idle_turns.max(1) {
                    txn.commit();
                    return;
                }
            }
        }
    }
}

enum Turn {
    Busy,
    Idle,
    Finished,
}

/// A native transaction of [`MemoryEngine`].
pub struct MemoryTransaction {
    id: NativeId,
    tables: TableSet,
    mode: TransactionMode,
    schema: Schema,
    store: Arc<Mutex<Store>>,
    state: Mutex<NativeState>,
}

#[derive(Default)]
struct NativeState {
    outcome: Option<NativeOutcome>,
    /// Set by every issued operation, cleared by the idle watcher.
    activity: bool,
    overlay: HashMap<String, Overlay>,
    on_complete: Vec<CompleteCallback>,
    on_abort: Vec<AbortCallback>,
}

/// Uncommitted writes of one table.
#[derive(Debug, Default)]
struct Overlay {
    cleared: bool,
    writes: BTreeMap<Key, Option<Value>>,
    next_key: Option<i64>,
}

impl Overlay {
    fn read<'a>(&'a self, key: &Key, data: &'a TableData) -> Option<&'a Value> {
        match self.writes.get(key) {
            Some(write) => write.as_ref(),
            None if self.cleared => None,
            None => data.rows.get(key),
        }
    }

    fn merged<'a>(&'a self, data: &'a TableData) -> BTreeMap<&'a Key, &'a Value> {
        let mut view: BTreeMap<&Key, &Value> = if self.cleared {
            BTreeMap::new()
        } else {
            data.rows.iter().collect()
        };
        for (key, write) in &self.writes {
            match write {
                Some(value) => {
                    view.insert(key, value);
                }
                None => {
                    view.remove(key);
                }
            }
        }
        view
    }

    /// Resolves the primary key against this transaction's key generator.
    fn resolve_key(
        &mut self,
        primary_key: &PrimaryKey,
        key: Option<Key>,
        value: Value,
        data: &TableData,
    ) -> EngineResult<(Key, Value)> {
        let mut next_key = self.next_key.unwrap_or(data.next_key);
        let resolved = primary_key.resolve(key, value, &mut next_key)?;
        self.next_key = Some(next_key);
        Ok(resolved)
    }

    fn apply(self, data: &mut TableData) {
        if let Some(next_key) = self.next_key {
            data.next_key = data.next_key.max(next_key);
        }
        if self.cleared {
            data.rows.clear();
        }
        for (key, write) in self.writes {
            match write {
                Some(value) => {
                    data.rows.insert(key, value);
                }
                None => {
                    data.rows.remove(&key);
                }
            }
        }
    }
}

impl MemoryTransaction {
    fn observe_turn(&self) -> Turn {
        let mut state = self.state.lock();
        if state.outcome.is_some() {
            Turn::Finished
        } else if std::mem::take(&mut state.activity) {
            Turn::Busy
        } else {
            Turn::Idle
        }
    }

    fn execute(
        &self,
        state: &mut NativeState,
        table: &str,
        op: Operation,
    ) -> EngineResult<OpOutput> {
        if state.outcome.is_some() {
            return Err(EngineError::inactive(self.id));
        }
        if !self.tables.contains(table) {
            return Err(EngineError::NotInScope {
                table: table.to_string(),
                native: self.id,
            });
        }
        if op.is_write() && !self.mode.allows_writes() {
            return Err(EngineError::ReadOnly {
                table: table.to_string(),
                native: self.id,
            });
        }
        state.activity = true;

        let spec = self
            .schema
            .store(table)
            .ok_or_else(|| EngineError::unknown_table(table))?;
        let mut store = self.store.lock();
        let data = store.tables.entry(table.to_string()).or_default();
        let overlay = state.overlay.entry(table.to_string()).or_default();

        match op {
            Operation::Get(key) => Ok(OpOutput::Value(overlay.read(&key, data).cloned())),
            Operation::GetAll => Ok(OpOutput::Values(
                overlay.merged(data).into_values().cloned().collect(),
            )),
            Operation::Count => Ok(OpOutput::Count(overlay.merged(data).len() as u64)),
            Operation::Add { key, value } => {
                let (key, value) = overlay.resolve_key(&spec.primary_key, key, value, data)?;
                if overlay.read(&key, data).is_some() {
                    return Err(EngineError::ConstraintViolation {
                        table: table.to_string(),
                        key,
                    });
                }
                overlay.writes.insert(key.clone(), Some(value));
                Ok(OpOutput::Key(key))
            }
            Operation::Put { key, value } => {
                let (key, value) = overlay.resolve_key(&spec.primary_key, key, value, data)?;
                overlay.writes.insert(key.clone(), Some(value));
                Ok(OpOutput::Key(key))
            }
            Operation::Delete(key) => {
                overlay.writes.insert(key, None);
                Ok(OpOutput::Done)
            }
            Operation::Clear => {
                overlay.cleared = true;
                overlay.writes.clear();
                Ok(OpOutput::Done)
            }
        }
    }

    fn commit(&self) {
        let callbacks = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return;
            }
            let overlay = std::mem::take(&mut state.overlay);
            let mut store = self.store.lock();
            for (table, writes) in overlay {
                writes.apply(store.tables.entry(table).or_default());
            }
            state.outcome = Some(NativeOutcome::Committed);
            state.on_abort.clear();
            std::mem::take(&mut state.on_complete)
        };
        debug!(native = %self.id, "native transaction committed");
        for callback in callbacks {
            callback();
        }
    }
}

impl NativeTransaction for MemoryTransaction {
    fn id(&self) -> NativeId {
        self.id
    }

    fn tables(&self) -> &TableSet {
        &self.tables
    }

    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn operate(&self, table: &str, op: Operation) -> EngineRequest {
        let name = op.name();
        let mut state = self.state.lock();
        let result = self.execute(&mut state, table, op);
        trace!(native = %self.id, table, op = name, ok = result.is_ok(), "operation");
        EngineRequest::ready(result)
    }

    fn on_complete(&self, callback: CompleteCallback) {
        let mut state = self.state.lock();
        if state.outcome.is_none() {
            state.on_complete.push(callback);
            return;
        }
        let committed = state.outcome == Some(NativeOutcome::Committed);
        drop(state);
        if committed {
            callback();
        }
    }

    fn on_abort(&self, callback: AbortCallback) {
        let mut state = self.state.lock();
        let reason = match &state.outcome {
            None => {
                state.on_abort.push(callback);
                return;
            }
            Some(NativeOutcome::Aborted(reason)) => reason.clone(),
            Some(NativeOutcome::Committed) => return,
        };
        drop(state);
        callback(&reason);
    }

    fn abort(&self) -> EngineResult<()> {
        let reason = EngineError::aborted("abort requested");
        let callbacks = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return Err(EngineError::inactive(self.id));
            }
            state.overlay.clear();
            state.outcome = Some(NativeOutcome::Aborted(reason.clone()));
            state.on_complete.clear();
            std::mem::take(&mut state.on_abort)
        };
        debug!(native = %self.id, "native transaction aborted");
        for callback in callbacks {
            callback(&reason);
        }
        Ok(())
    }

    fn outcome(&self) -> Option<NativeOutcome> {
        self.state.lock().outcome.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::completion;
    use serde_json::json;

    fn engine() -> MemoryEngine {
        let schema = Schema::from_stores([("users", "username"), ("pets", "++id,kind")]).unwrap();
        MemoryEngine::new("test", schema)
    }

    fn add(value: Value) -> Operation {
        Operation::Add { key: None, value }
    }

    #[tokio::test]
    async fn idle_transaction_commits_on_its_own() {
        let engine = engine();
        let txn = engine
            .open_transaction(&TableSet::new(["users"]), TransactionMode::ReadWrite)
            .unwrap();
        let mut request = txn.operate("users", add(json!({"username": "arne"})));
        assert_eq!(request.try_take(), Some(Ok(OpOutput::Key(Key::from("arne")))));
        assert_eq!(engine.committed_len("users").unwrap(), 0);

        assert_eq!(completion(txn.as_ref()).await, NativeOutcome::Committed);
        assert_eq!(engine.committed_len("users").unwrap(), 1);
    }

    #[tokio::test]
    async fn abort_discards_writes_and_rejects_later_operations() {
        let engine = engine();
        let txn = engine
            .open_transaction(&TableSet::new(["pets"]), TransactionMode::ReadWrite)
            .unwrap();
        let _ = txn.operate("pets", add(json!({"kind": "cat"})));
        txn.abort().unwrap();

        let mut late = txn.operate("pets", Operation::Count);
        assert!(matches!(
            late.try_take(),
            Some(Err(EngineError::TransactionInactive { .. }))
        ));
        assert!(txn.abort().is_err());
        tokio::task::yield_now().await;
        assert_eq!(engine.committed_len("pets").unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_add_is_a_constraint_violation() {
        let engine = engine();
        let txn = engine
            .open_transaction(&TableSet::new(["users"]), TransactionMode::ReadWrite)
            .unwrap();
        let _ = txn.operate("users", add(json!({"username": "sune"})));
        let mut second = txn.operate("users", add(json!({"username": "sune"})));
        assert!(matches!(
            second.try_take(),
            Some(Err(EngineError::ConstraintViolation { .. }))
        ));
    }

    #[tokio::test]
    async fn readonly_and_scope_are_enforced() {
        let engine = engine();
        let txn = engine
            .open_transaction(&TableSet::new(["users"]), TransactionMode::ReadOnly)
            .unwrap();
        let mut write = txn.operate("users", add(json!({"username": "x"})));
        assert!(matches!(write.try_take(), Some(Err(EngineError::ReadOnly { .. }))));
        let mut other = txn.operate("pets", Operation::Count);
        assert!(matches!(other.try_take(), Some(Err(EngineError::NotInScope { .. }))));
    }

    #[tokio::test]
    async fn reads_see_own_overlay_and_clear() {
        let engine = engine();
        let txn = engine
            .open_transaction(&TableSet::new(["pets"]), TransactionMode::ReadWrite)
            .unwrap();
        let _ = txn.operate("pets", add(json!({"kind": "dog"})));
        let _ = txn.operate("pets", add(json!({"kind": "cat"})));
        let mut count = txn.operate("pets", Operation::Count);
        assert_eq!(count.try_take(), Some(Ok(OpOutput::Count(2))));

        let _ = txn.operate("pets", Operation::Clear);
        let mut all = txn.operate("pets", Operation::GetAll);
        assert_eq!(all.try_take(), Some(Ok(OpOutput::Values(vec![]))));
    }

    #[tokio::test]
    async fn aborted_transaction_does_not_consume_generated_keys() {
        let engine = engine();
        let pets = TableSet::new(["pets"]);
        let aborted = engine
            .open_transaction(&pets, TransactionMode::ReadWrite)
            .unwrap();
        let mut first = aborted.operate("pets", add(json!({"kind": "cat"})));
        assert_eq!(first.try_take(), Some(Ok(OpOutput::Key(Key::Int(1)))));
        let _ = aborted.operate("pets", add(json!({"kind": "dog"})));
        aborted.abort().unwrap();

        let txn = engine
            .open_transaction(&pets, TransactionMode::ReadWrite)
            .unwrap();
        let mut key = txn.operate("pets", add(json!({"kind": "cat"})));
        assert_eq!(key.try_take(), Some(Ok(OpOutput::Key(Key::Int(1)))));
        assert_eq!(completion(txn.as_ref()).await, NativeOutcome::Committed);

        let next = engine
            .open_transaction(&pets, TransactionMode::ReadWrite)
            .unwrap();
        let mut key = next.operate("pets", add(json!({"kind": "dog"})));
        assert_eq!(key.try_take(), Some(Ok(OpOutput::Key(Key::Int(2)))));
    }

    #[tokio::test]
    async fn listeners_registered_after_commit_fire_immediately() {
        let engine = engine();
        let txn = engine
            .open_transaction(&TableSet::new(["users"]), TransactionMode::ReadOnly)
            .unwrap();
        completion(txn.as_ref()).await;

        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);
        txn.on_complete(Box::new(move || *flag.lock() = true));
        assert!(*fired.lock());
    }

    #[derive(Debug, Clone)]
    enum Step {
        Put(i64, i64),
        Delete(i64),
        Clear,
    }

    fn step_strategy() -> impl proptest::strategy::Strategy<Value = Step> {
        use proptest::prelude::*;
        prop_oneof![
            4 => (0i64..8, any::<i64>()).prop_map(|(k, v)| Step::Put(k, v)),
            2 => (0i64..8).prop_map(Step::Delete),
            1 => Just(Step::Clear),
        ]
    }

    proptest::proptest! {
        #[test]
        fn committed_state_matches_overlay_model(
            seed in proptest::collection::vec((0i64..8, 0i64..100), 0..6),
            steps in proptest::collection::vec(step_strategy(), 0..24),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let schema = Schema::from_stores([("items", "")]).unwrap();
            let engine = MemoryEngine::new("model", schema);
            let tables = TableSet::new(["items"]);

            let mut model: BTreeMap<i64, i64> = BTreeMap::new();
            runtime.block_on(async {
                let txn = engine.open_transaction(&tables, TransactionMode::ReadWrite).unwrap();
                for (key, value) in &seed {
                    model.insert(*key, *value);
                    let _ = txn.operate("items", Operation::Put { key: Some(Key::Int(*key)), value: json!(value) });
                }
                completion(txn.as_ref()).await;

                let txn = engine.open_transaction(&tables, TransactionMode::ReadWrite).unwrap();
                for step in &steps {
                    let op = match step {
                        Step::Put(key, value) => {
                            model.insert(*key, *value);
                            Operation::Put { key: Some(Key::Int(*key)), value: json!(value) }
                        }
                        Step::Delete(key) => {
                            model.remove(key);
                            Operation::Delete(Key::Int(*key))
                        }
                        Step::Clear => {
                            model.clear();
                            Operation::Clear
                        }
                    };
                    let _ = txn.operate("items", op);
                }
                assert_eq!(completion(txn.as_ref()).await, NativeOutcome::Committed);
            });

            let expected: Vec<Value> = model.values().map(|value| json!(value)).collect();
            let stored: Vec<Value> = engine.store.lock().tables["items"].rows.values().cloned().collect();
            proptest::prop_assert_eq!(stored, expected);
        }
    }

    #[test]
    fn opening_without_runtime_fails() {
        let engine = engine();
        let result = engine.open_transaction(&TableSet::new(["users"]), TransactionMode::ReadOnly);
        assert!(matches!(result, Err(EngineError::NoRuntime)));
    }
}
