//! Core type definitions shared by engines and the coordinator.

use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a native engine transaction.
///
/// Native IDs are monotonically increasing per engine and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NativeId(pub u64);

impl NativeId {
    /// Creates a new native transaction ID.
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

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native:{}", self.0)
    }
}

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

impl TransactionMode {
    /// Returns true if writes are permitted.
    #[must_use]
    pub const fn allows_writes(self) -> bool {
        matches!(self, Self::ReadWrite)
    }

    /// Returns true if a scope in this mode can serve a request in `requested` mode.
    #[must_use]
    pub const fn covers(self, requested: TransactionMode) -> bool {
        self.allows_writes() || !requested.allows_writes()
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => f.write_str("readonly"),
            Self::ReadWrite => f.write_str("readwrite"),
        }
    }
}

/// An ordered, duplicate-free set of table names.
///
/// A transaction's table set is fixed at creation, so this type offers no
/// mutation after construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TableSet(BTreeSet<String>);

impl TableSet {
    /// Creates a table set from any list of names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Returns true if `table` is in the set.
    #[must_use]
    pub fn contains(&self, table: &str) -> bool {
        self.0.contains(table)
    }

    /// Returns true if every table of `self` is also in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &TableSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Returns the first table of `self` that is missing from `other`.
    #[must_use]
    pub fn first_missing_from<'a>(&'a self, other: &TableSet) -> Option<&'a str> {
        self.0
            .iter()
            .find(|name| !other.0.contains(*name))
            .map(String::as_str)
    }

    /// Returns the first table in lexical order.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.0.iter().next().map(String::as_str)
    }

    /// Returns the number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over table names in lexical order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for TableSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, name) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_id_display() {
        assert_eq!(format!("{}", NativeId::new(7)), "native:7");
    }

    #[test]
    fn readwrite_covers_readonly() {
        assert!(TransactionMode::ReadWrite.covers(TransactionMode::ReadOnly));
        assert!(TransactionMode::ReadWrite.covers(TransactionMode::ReadWrite));
        assert!(TransactionMode::ReadOnly.covers(TransactionMode::ReadOnly));
        assert!(!TransactionMode::ReadOnly.covers(TransactionMode::ReadWrite));
    }

    #[test]
    fn table_set_subset_and_missing() {
        let outer = TableSet::new(["users", "pets"]);
        let inner = TableSet::new(["pets"]);
        let other = TableSet::new(["pets", "petsPerUser"]);

        assert!(inner.is_subset(&outer));
        assert!(!other.is_subset(&outer));
        assert_eq!(other.first_missing_from(&outer), Some("petsPerUser"));
        assert_eq!(inner.first_missing_from(&outer), None);
    }

    #[test]
    fn table_set_dedups_and_displays_sorted() {
        let set: TableSet = ["users", "pets", "users"].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.first(), Some("pets"));
        assert_eq!(set.to_string(), "{pets, users}");
    }
}
