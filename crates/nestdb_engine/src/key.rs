//! Primary keys.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A primary key.
///
/// Integer keys sort before text keys, mirroring the key ordering of
/// object-store engines.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Integer key (also produced by auto-increment generators).
    Int(i64),
    /// Text key.
    Text(String),
}

impl Key {
    /// Extracts a key from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for anything that is not an integer or a string.
    pub fn from_value(value: &Value) -> EngineResult<Self> {
        match value {
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .ok_or_else(|| EngineError::invalid_key(format!("non-integer number {n}"))),
            other => Err(EngineError::invalid_key(format!(
                "unsupported key value {other}"
            ))),
        }
    }

    /// Converts the key back into a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}
