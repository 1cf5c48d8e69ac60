//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random transaction scopes over the
//! standard test schema.

use crate::fixtures::TEST_STORES;
use nestdb_core::{NestingPolicy, TableSet, TransactionMode};
use proptest::prelude::*;

/// Strategy for generating a transaction mode.
pub fn mode_strategy() -> impl Strategy<Value = TransactionMode> {
    prop_oneof![Just(TransactionMode::ReadOnly), Just(TransactionMode::ReadWrite)]
}

/// Strategy for generating a nesting policy.
pub fn policy_strategy() -> impl Strategy<Value = NestingPolicy> {
    prop_oneof![
        Just(NestingPolicy::Default),
        Just(NestingPolicy::Independent),
        Just(NestingPolicy::ReuseIfCompatible),
    ]
}

/// Strategy for generating a non-empty set of standard tables.
pub fn table_set_strategy() -> impl Strategy<Value = TableSet> {
    let names: Vec<&'static str> = TEST_STORES.iter().map(|(name, _)| *name).collect();
    proptest::sample::subsequence(names.clone(), 1..=names.len()).prop_map(TableSet::new)
}

/// Strategy for generating a valid mode string such as `"rw?"`.
pub fn mode_string_strategy() -> impl Strategy<Value = String> {
    (
        prop_oneof![Just("r"), Just("rw"), Just("readonly"), Just("readwrite")],
        prop_oneof![Just(""), Just("!"), Just("?")],
    )
        .prop_map(|(mode, suffix)| format!("{mode}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_table_sets_are_not_empty(tables in table_set_strategy()) {
            prop_assert!(!tables.is_empty());
        }

        #[test]
        fn generated_mode_strings_parse(spec in mode_string_strategy()) {
            prop_assert!(spec.parse::<nestdb_core::ModeSpec>().is_ok());
        }
    }
}
