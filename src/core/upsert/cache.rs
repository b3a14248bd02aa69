use crate::core::common::CompatError;
use crate::core::connection::Driver;
use crate::core::introspect::{self, ColumnDescriptor, UniqueKey};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct TableSchema {
    columns: Vec<ColumnDescriptor>,
    keys: Vec<UniqueKey>,
}

/// Opt-in cache of table schemas for repeated upserts.
///
/// Owned by the caller and never shared implicitly. Call
/// [`SchemaCache::invalidate`] (or [`SchemaCache::clear`]) after a migration
/// changes a cached table.
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    tables: HashMap<String, TableSchema>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns and unique keys of `table`, read from the catalog on first use.
    pub fn schema(
        &mut self,
        driver: &mut dyn Driver,
        table: &str,
    ) -> Result<(&[ColumnDescriptor], &[UniqueKey]), CompatError> {
        if !self.tables.contains_key(table) {
            debug!(table, "schema cache miss");
            let columns = introspect::describe_columns(driver, table)?;
            let keys = introspect::describe_unique_keys(driver, table)?;
            self.tables.insert(table.to_string(), TableSchema { columns, keys });
        }
        match self.tables.get(table) {
            Some(schema) => Ok((&schema.columns, &schema.keys)),
            None => Err(CompatError::InvalidInput(format!("schema for '{table}' missing from cache"))),
        }
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Forgets `table`; returns whether it was cached.
    pub fn invalidate(&mut self, table: &str) -> bool {
        self.tables.remove(table).is_some()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SqliteConfig;
    use crate::core::connection::SqliteDriver;

    #[test]
    fn test_cache_reads_once_until_invalidated() {
        let config = SqliteConfig { path: ":memory:".into(), ..SqliteConfig::default() };
        let mut driver = SqliteDriver::open(&config).unwrap();
        driver.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT)", &[]).unwrap();

        let mut cache = SchemaCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.schema(&mut driver, "t").unwrap().0.len(), 2);
        assert!(cache.contains("t"));

        // A schema change stays invisible until the entry is invalidated.
        driver.execute("ALTER TABLE t ADD COLUMN b TEXT", &[]).unwrap();
        assert_eq!(cache.schema(&mut driver, "t").unwrap().0.len(), 2);
        assert!(cache.invalidate("t"));
        assert!(!cache.invalidate("t"));
        let (columns, keys) = cache.schema(&mut driver, "t").unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(keys[0].columns, vec!["id"]);

        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
