// src/core/connection/mod.rs
//! Physical driver seam.
//!
//! Everything above this module talks to a database through [`Driver`]. The
//! two built-in drivers wrap `rusqlite` and the synchronous `postgres` client;
//! tests substitute a scripted driver.

pub mod pg;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod scripted;

use crate::core::common::types::{BackendMode, CompatRow, Value};
use crate::core::common::CompatError;
use crate::core::query::sql::scanner;

pub use pg::PostgresDriver;
pub use sqlite::SqliteDriver;

/// One row as the driver produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeRow {
    /// Values in result-column order; names come from [`DriverOutcome::columns`].
    Positional(Vec<Value>),
    /// A name -> value row, for drivers that natively return named rows.
    Named(Vec<(String, Value)>),
}

impl NativeRow {
    /// Detaches the row into a [`CompatRow`].
    pub fn into_compat(self, columns: &[String]) -> CompatRow {
        match self {
            Self::Positional(values) => CompatRow::from_positional(columns, values),
            Self::Named(pairs) => CompatRow::from_named(pairs),
        }
    }
}

/// Result of one statement execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<NativeRow>,
    /// Affected (or returned) row count, when the driver reports one.
    pub rows_affected: Option<u64>,
}

impl DriverOutcome {
    /// An outcome with no columns, no rows and no row count.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn affected(rows: u64) -> Self {
        Self { columns: Vec::new(), rows: Vec::new(), rows_affected: Some(rows) }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<NativeRow>) -> Self {
        Self { columns, rows, rows_affected: None }
    }
}

/// A physical connection to one backend.
///
/// Implementations run statements already written in their own dialect; no
/// translation happens at this level. Both built-in drivers keep the legacy
/// implicit-transaction behaviour: a transaction is opened before the first
/// statement that needs one and ended only by `commit` or `rollback`.
pub trait Driver: Send {
    fn mode(&self) -> BackendMode;

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<DriverOutcome, CompatError>;

    /// Runs `sql` once per parameter set and returns the total affected row count.
    fn execute_many(&mut self, sql: &str, batch: &[Vec<Value>]) -> Result<u64, CompatError>;

    /// Native id of the most recently inserted row, for engines that track one.
    fn last_insert_rowid(&self) -> Option<i64>;

    fn commit(&mut self) -> Result<(), CompatError>;

    fn rollback(&mut self) -> Result<(), CompatError>;

    /// Releases the physical connection. Calling it twice is not an error.
    fn close(&mut self) -> Result<(), CompatError>;

    fn is_closed(&self) -> bool;
}

/// How a statement affects the surrounding transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxEffect {
    Begin,
    End,
    None,
}

pub(crate) fn transaction_effect(sql: &str) -> TxEffect {
    let mut words = scanner::words(sql).map(|(_, w)| w);
    let Some(first) = words.next() else {
        return TxEffect::None;
    };
    match first.to_ascii_uppercase().as_str() {
        "BEGIN" | "START" => TxEffect::Begin,
        "COMMIT" | "END" | "ABORT" => TxEffect::End,
        "ROLLBACK" => match words.next() {
            Some(next) if next.eq_ignore_ascii_case("TO") => TxEffect::None,
            _ => TxEffect::End,
        },
        _ => TxEffect::None,
    }
}

/// Data-modifying statements that open an implicit transaction on SQLite.
pub(crate) fn is_dml(sql: &str) -> bool {
    scanner::words(sql).next().is_some_and(|(_, w)| {
        ["INSERT", "UPDATE", "DELETE", "REPLACE"].iter().any(|kw| w.eq_ignore_ascii_case(kw))
    })
}

/// Double-quotes an identifier for use in generated statements.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_effect() {
        assert_eq!(transaction_effect("BEGIN"), TxEffect::Begin);
        assert_eq!(transaction_effect("start transaction"), TxEffect::Begin);
        assert_eq!(transaction_effect("COMMIT"), TxEffect::End);
        assert_eq!(transaction_effect("ROLLBACK"), TxEffect::End);
        assert_eq!(transaction_effect("ROLLBACK TO SAVEPOINT sp"), TxEffect::None);
        assert_eq!(transaction_effect("SAVEPOINT sp"), TxEffect::None);
        assert_eq!(transaction_effect("SELECT 'COMMIT'"), TxEffect::None);
        assert_eq!(transaction_effect(""), TxEffect::None);
    }

    #[test]
    fn test_is_dml() {
        assert!(is_dml("insert into t values (1)"));
        assert!(is_dml("  UPDATE t SET a = 1"));
        assert!(is_dml("REPLACE INTO t VALUES (1)"));
        assert!(!is_dml("SELECT * FROM t"));
        assert!(!is_dml("CREATE TABLE t (a INTEGER)"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("widgets"), "\"widgets\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_native_rows_detach() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let positional = NativeRow::Positional(vec![Value::Integer(1), Value::from("bolt")]);
        let row = positional.into_compat(&columns);
        assert_eq!(row.value_of("name").unwrap(), &Value::from("bolt"));

        let named = NativeRow::Named(vec![("id".to_string(), Value::Integer(2))]);
        let row = named.into_compat(&[]);
        assert_eq!(row.keys(), &["id".to_string()]);
        assert_eq!(row.value_at(0).unwrap(), &Value::Integer(2));
    }
}
