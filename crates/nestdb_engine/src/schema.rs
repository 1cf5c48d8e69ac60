//! Table declarations.
//!
//! Each table is declared with a compact store spec:
//!
//! | Spec          | Primary key                                   |
//! |---------------|-----------------------------------------------|
//! | `"username"`  | inline, read from the `username` field        |
//! | `"++id,kind"` | inline `id`, generated when absent; index `kind` |
//! | `"++"`        | out-of-line, always generated unless given    |
//! | `""`          | out-of-line, caller supplies the key          |
//!
//! Names after the first comma are secondary index names.

use crate::error::{EngineError, EngineResult};
use crate::key::Key;
use serde_json::Value;
use std::collections::BTreeMap;

/// How a table derives the primary key of a stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    /// Field holding the key inside the value, if the key is inline.
    pub key_path: Option<String>,
    /// Whether missing keys are generated.
    pub auto_increment: bool,
}

impl PrimaryKey {
    /// Resolves the key for a write, generating one if allowed.
    ///
    /// Generated keys for inline tables are written back into `value`.
    /// `next_key` is the table's generator and advances past any integer key
    /// that is used.
    pub(crate) fn resolve(
        &self,
        explicit: Option<Key>,
        mut value: Value,
        next_key: &mut i64,
    ) -> EngineResult<(Key, Value)> {
        let key = match (&self.key_path, explicit) {
            (Some(path), Some(_)) => {
                return Err(EngineError::invalid_key(format!(
                    "explicit key given for table with inline key path {path}"
                )));
            }
            (Some(path), None) => match value.get(path.as_str()) {
                Some(field) => Key::from_value(field)?,
                None if self.auto_increment => {
                    let key = Key::Int(*next_key);
                    let object = value.as_object_mut().ok_or_else(|| {
                        EngineError::invalid_key("generated inline key needs an object value")
                    })?;
                    object.insert(path.clone(), key.to_value());
                    key
                }
                None => {
                    return Err(EngineError::invalid_key(format!(
                        "value has no field {path}"
                    )));
                }
            },
            (None, Some(key)) => key,
            (None, None) if self.auto_increment => Key::Int(*next_key),
            (None, None) => return Err(EngineError::invalid_key("no key supplied")),
        };

        if let Key::Int(n) = key {
            if self.auto_increment && n >= *next_key {
                *next_key = n + 1;
            }
        }
        Ok((key, value))
    }
}

/// Declaration of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    /// Primary key definition.
    pub primary_key: PrimaryKey,
    /// Secondary index names.
    pub indexes: Vec<String>,
}

impl StoreSpec {
    /// Parses a store spec such as `"++id,kind"`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` for empty or modified index names.
    pub fn parse(spec: &str) -> EngineResult<Self> {
        let mut parts = spec.split(',').map(str::trim);
        let primary = parts.next().unwrap_or_default();
        let (auto_increment, path) = match primary.strip_prefix("++") {
            Some(rest) => (true, rest),
            None => (false, primary),
        };

        let mut indexes = Vec::new();
        for name in parts {
            if name.is_empty() {
                return Err(EngineError::invalid_schema(format!(
                    "empty index name in {spec:?}"
                )));
            }
            if name.starts_with(['&', '*', '[']) {
                return Err(EngineError::invalid_schema(format!(
                    "unsupported index modifier in {name:?}"
                )));
            }
            indexes.push(name.to_string());
        }

        Ok(Self {
            primary_key: PrimaryKey {
                key_path: (!path.is_empty()).then(|| path.to_string()),
                auto_increment,
            },
            indexes,
        })
    }
}

/// The set of tables an engine serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    stores: BTreeMap<String, StoreSpec>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schema from `(table, spec)` pairs.
    ///
    /// # Example
    ///
    /// ```
    /// use nestdb_engine::Schema;
    ///
    /// let schema = Schema::from_stores([
    ///     ("users", "username"),
    ///     ("pets", "++id,kind"),
    /// ])
    /// .unwrap();
    /// assert!(schema.contains("pets"));
    /// ```
    pub fn from_stores<'a, I>(stores: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        stores
            .into_iter()
            .try_fold(Self::new(), |schema, (name, spec)| schema.with_store(name, spec))
    }

    /// Adds a table declaration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if the name is empty, already declared, or the
    /// spec does not parse.
    pub fn with_store(mut self, name: &str, spec: &str) -> EngineResult<Self> {
        if name.is_empty() {
            return Err(EngineError::invalid_schema("empty table name"));
        }
        if self.stores.contains_key(name) {
            return Err(EngineError::invalid_schema(format!(
                "table {name} declared twice"
            )));
        }
        self.stores.insert(name.to_string(), StoreSpec::parse(spec)?);
        Ok(self)
    }

    /// Returns the declaration of a table.
    #[must_use]
    pub fn store(&self, name: &str) -> Option<&StoreSpec> {
        self.stores.get(name)
    }

    /// Returns true if the table is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    /// Iterates over declared table names.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }
}
