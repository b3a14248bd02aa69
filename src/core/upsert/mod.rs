//! Upsert Engine.
//!
//! Builds a single insert-or-update statement in the embedded dialect from a
//! field map and the table's live schema. Execution happens through a cursor
//! (see `crate::api::upsert`), so the statement is translated like any other.

pub mod cache;
pub mod filters;
pub mod registry;

pub use cache::SchemaCache;
pub use filters::{sql_is_active_true, sql_is_deleted_false};
pub use registry::UpsertRegistry;

use crate::core::common::types::Value;
use crate::core::common::{CompatError, DriverError};
use crate::core::connection::quote_ident;
use crate::core::introspect::{ColumnDescriptor, UniqueKey};
use std::collections::BTreeMap;

/// Column name -> value payload of one upsert. Keys that are not columns of
/// the target table are ignored.
pub type Fields = BTreeMap<String, Value>;

/// SQLSTATE for "no unique or exclusion constraint matching the ON CONFLICT specification".
const PG_INVALID_CONFLICT_TARGET: &str = "42P10";
const SQLITE_INVALID_CONFLICT_TARGET: &str = "does not match any PRIMARY KEY or UNIQUE constraint";

/// Builds a [`Fields`] map from `(name, value)` pairs.
pub fn fields<I, K, V>(pairs: I) -> Fields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// A generated upsert statement and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertPlan {
    pub table: String,
    /// Statement with `?` placeholders.
    pub sql: String,
    pub params: Vec<Value>,
    pub insert_columns: Vec<String>,
    pub conflict_columns: Vec<String>,
    /// Right-hand sides of the update list, empty for insert-or-ignore.
    pub assignments: Vec<String>,
}

/// Timestamp columns given no concrete value take their default on insert.
fn is_deferred_timestamp(column: &ColumnDescriptor, value: &Value) -> bool {
    column.declared_type == "TIMESTAMP"
        && match value {
            Value::Null => true,
            Value::Text(text) => text.eq_ignore_ascii_case("now"),
            _ => false,
        }
}

/// A TIMESTAMP column named for update but absent from the payload is bumped to now.
fn is_unsupplied_timestamp(columns: &[ColumnDescriptor], fields: &Fields, name: &str) -> bool {
    !fields.contains_key(name)
        && columns.iter().any(|c| c.name == name && c.declared_type == "TIMESTAMP")
}

fn blank_to_null(value: &Value) -> Value {
    match value {
        Value::Text(text) if text.trim().is_empty() => Value::Null,
        other => other.clone(),
    }
}

/// Picks conflict columns when the caller gave none: the first unique key
/// fully covered by the inserted columns, else the primary key.
pub fn detect_conflict_columns(keys: &[UniqueKey], insert_columns: &[String]) -> Option<Vec<String>> {
    keys.iter()
        .find(|key| key.columns.iter().all(|c| insert_columns.contains(c)))
        .or_else(|| keys.iter().find(|key| key.primary))
        .map(|key| key.columns.clone())
}

impl UpsertPlan {
    /// Plans an upsert of `fields` into `table`.
    ///
    /// `columns` and `keys` describe the live table. `update` defaults to the
    /// supplied columns minus the conflict columns; an empty update list turns
    /// the statement into insert-or-ignore.
    ///
    /// # Errors
    /// `InvalidInput` when no supplied field is a column of `table`, or when
    /// no conflict columns were given and the table has no unique key.
    pub fn build(
        table: &str,
        columns: &[ColumnDescriptor],
        keys: &[UniqueKey],
        fields: &Fields,
        conflict: Option<&[String]>,
        update: Option<&[String]>,
    ) -> Result<Self, CompatError> {
        let mut insert_columns = Vec::new();
        let mut params = Vec::new();
        let mut deferred = Vec::new();
        for column in columns {
            let Some(value) = fields.get(&column.name) else { continue };
            let value = blank_to_null(value);
            if is_deferred_timestamp(column, &value) {
                deferred.push(column.name.clone());
            } else {
                insert_columns.push(column.name.clone());
                params.push(value);
            }
        }
        if insert_columns.is_empty() {
            return Err(CompatError::InvalidInput(format!("no insertable columns for table '{table}'")));
        }

        let conflict_columns = match conflict {
            Some(columns) if !columns.is_empty() => columns.to_vec(),
            _ => detect_conflict_columns(keys, &insert_columns).ok_or_else(|| {
                CompatError::InvalidInput(format!("table '{table}' has no unique key to upsert on"))
            })?,
        };

        let update_columns: Vec<String> = match update {
            Some(columns) => columns.to_vec(),
            None => insert_columns
                .iter()
                .chain(deferred.iter())
                .filter(|c| !conflict_columns.contains(c))
                .cloned()
                .collect(),
        };
        let assignments: Vec<String> = update_columns
            .iter()
            .filter_map(|column| {
                if insert_columns.contains(column) {
                    Some(format!("{0} = excluded.{0}", quote_ident(column)))
                } else if deferred.contains(column) || is_unsupplied_timestamp(columns, fields, column) {
                    Some(format!("{} = CURRENT_TIMESTAMP", quote_ident(column)))
                } else {
                    None
                }
            })
            .collect();

        let column_list = insert_columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let placeholders = vec!["?"; insert_columns.len()].join(", ");
        let target = conflict_columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let action = if assignments.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", assignments.join(", "))
        };
        let sql = format!(
            "INSERT INTO {} ({column_list}) VALUES ({placeholders}) ON CONFLICT ({target}) {action}",
            quote_ident(table)
        );

        Ok(Self { table: table.to_string(), sql, params, insert_columns, conflict_columns, assignments })
    }

    /// Re-types a driver error that rejects the conflict target.
    pub fn classify_error(&self, err: CompatError) -> CompatError {
        match err {
            CompatError::Driver(source) if is_conflict_target_error(&source) => CompatError::ConflictTarget {
                table: self.table.clone(),
                columns: self.conflict_columns.clone(),
                source,
            },
            other => other,
        }
    }
}

/// True if the native error says no unique constraint matches an `ON CONFLICT` target.
pub fn is_conflict_target_error(err: &DriverError) -> bool {
    err.has_code(PG_INVALID_CONFLICT_TARGET) || err.message.contains(SQLITE_INVALID_CONFLICT_TARGET)
}
