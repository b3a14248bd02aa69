use crate::core::config::{CompatConfig, UpsertRule};
use std::collections::BTreeMap;
use tracing::info;

/// Caller-owned per-table upsert defaults.
///
/// Nothing is registered globally; a registry is built from configuration or
/// filled by hand and passed to `upsert_registered`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertRegistry {
    rules: BTreeMap<String, UpsertRule>,
}

impl UpsertRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `[upsert.<table>]` sections of `config`.
    pub fn from_config(config: &CompatConfig) -> Self {
        Self { rules: config.upsert.clone() }
    }

    /// Adds or replaces the rule for `table`.
    pub fn register(&mut self, table: impl Into<String>, rule: UpsertRule) {
        let table = table.into();
        info!(table = %table, "upsert rule registered");
        self.rules.insert(table, rule);
    }

    pub fn get(&self, table: &str) -> Option<&UpsertRule> {
        self.rules.get(table)
    }

    pub fn remove(&mut self, table: &str) -> Option<UpsertRule> {
        self.rules.remove(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
