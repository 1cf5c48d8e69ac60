//! Core type definitions for NestDB.

use crate::error::CoreError;
use nestdb_engine::{TableSet, TransactionMode};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a transaction handle.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identity of one open database instance.
///
/// Two `Database` values opened over engines with the same name still have
/// different IDs; transactions are only ever shared within one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatabaseId(Uuid);

impl DatabaseId {
    /// Creates a new random database ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DatabaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db:{}", self.0)
    }
}

/// How a nested transaction request relates to the ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NestingPolicy {
    /// Join the ambient transaction; fail if its scope is incompatible.
    #[default]
    Default,
    /// Always open a new native transaction (`!` suffix).
    Independent,
    /// Join if compatible, otherwise open a new one (`?` suffix).
    ReuseIfCompatible,
}

/// A parsed mode string such as `"rw"`, `"r?"` or `"readwrite!"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSpec {
    /// Access mode.
    pub mode: TransactionMode,
    /// Nesting policy.
    pub policy: NestingPolicy,
}

impl FromStr for ModeSpec {
    type Err = CoreError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidMode {
            spec: spec.to_string(),
        };
        let trimmed = spec.trim();
        let (body, policy) = if let Some(rest) = trimmed.strip_suffix('!') {
            (rest, NestingPolicy::Independent)
        } else if let Some(rest) = trimmed.strip_suffix('?') {
            (rest, NestingPolicy::ReuseIfCompatible)
        } else {
            (trimmed, NestingPolicy::Default)
        };
        let mode = match body {
            "r" | "readonly" => TransactionMode::ReadOnly,
            "rw" | "readwrite" => TransactionMode::ReadWrite,
            _ => return Err(invalid()),
        };
        Ok(Self { mode, policy })
    }
}

/// A request for a transaction scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRequest {
    /// Access mode.
    pub mode: TransactionMode,
    /// Tables in scope.
    pub tables: TableSet,
    /// Nesting policy.
    pub policy: NestingPolicy,
}

impl ScopeRequest {
    /// Creates a request with the default nesting policy.
    pub fn new<I, S>(mode: TransactionMode, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode,
            tables: TableSet::new(tables),
            policy: NestingPolicy::Default,
        }
    }

    /// Creates a request from a mode string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMode` if the string does not parse.
    pub fn parse<I, S>(mode: &str, tables: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec: ModeSpec = mode.parse()?;
        Ok(Self::new(spec.mode, tables).with_policy(spec.policy))
    }

    /// Sets the nesting policy.
    #[must_use]
    pub fn with_policy(mut self, policy: NestingPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        assert!(TransactionId::new(1) < TransactionId::new(2));
        assert_eq!(format!("{}", TransactionId::new(42)), "txn:42");
    }

    #[test]
    fn database_ids_are_unique() {
        assert_ne!(DatabaseId::new(), DatabaseId::new());
    }

    #[test]
    fn parse_mode_strings() {
        let spec: ModeSpec = "rw".parse().unwrap();
        assert_eq!(spec.mode, TransactionMode::ReadWrite);
        assert_eq!(spec.policy, NestingPolicy::Default);

        let spec: ModeSpec = "r?".parse().unwrap();
        assert_eq!(spec.mode, TransactionMode::ReadOnly);
        assert_eq!(spec.policy, NestingPolicy::ReuseIfCompatible);

        let spec: ModeSpec = "readwrite!".parse().unwrap();
        assert_eq!(spec.mode, TransactionMode::ReadWrite);
        assert_eq!(spec.policy, NestingPolicy::Independent);
    }

    #[test]
    fn reject_unknown_modes() {
        assert!("w".parse::<ModeSpec>().is_err());
        assert!("rw!?".parse::<ModeSpec>().is_err());
        assert!("".parse::<ModeSpec>().is_err());
    }

    #[test]
    fn scope_request_from_mode_string() {
        let request = ScopeRequest::parse("rw!", ["users", "pets"]).unwrap();
        assert_eq!(request.policy, NestingPolicy::Independent);
        assert_eq!(request.tables.len(), 2);
    }
}
