//! Schema Introspector.
//!
//! Answers "which columns does table X have" for both backends in one shape,
//! and emulates `PRAGMA table_info(<table>)` on PostgreSQL by querying the
//! information schema and reshaping the result into SQLite's six columns.
//! Nothing here is cached: every call reads the live catalog.

use crate::core::common::types::{BackendMode, CompatRow, Value};
use crate::core::common::CompatError;
use crate::core::connection::{quote_ident, Driver, DriverOutcome, NativeRow};
use crate::core::query::sql::{recognize, PseudoCommand};
use tracing::debug;

/// Column catalog joined with primary-key membership, in SQLite's `table_info` shape.
/// `cid` is returned 1-based and renumbered after decoding.
pub(crate) const PG_TABLE_INFO: &str = "\
SELECT c.ordinal_position::int8 AS cid,
       c.column_name::text AS name,
       c.data_type::text AS type,
       (CASE WHEN c.is_nullable = 'NO' THEN 1 ELSE 0 END)::int8 AS notnull,
       c.column_default::text AS dflt_value,
       COALESCE(pk.position, 0)::int8 AS pk
FROM information_schema.columns c
LEFT JOIN (
    SELECT kcu.column_name, kcu.ordinal_position AS position
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON kcu.constraint_schema = tc.constraint_schema
     AND kcu.constraint_name = tc.constraint_name
     AND kcu.table_name = tc.table_name
    WHERE tc.constraint_type = 'PRIMARY KEY'
      AND tc.table_schema = current_schema()
      AND tc.table_name = $1::text
) pk ON pk.column_name = c.column_name
WHERE c.table_schema = current_schema()
  AND c.table_name = $1::text
ORDER BY c.ordinal_position";

/// Unique, non-partial, column-only indexes of a table, primary key first.
pub(crate) const PG_UNIQUE_KEYS: &str = "\
SELECT ix.indexrelid::int8 AS index_id,
       ix.indisprimary AS is_primary,
       a.attname::text AS column_name
FROM pg_index ix
JOIN pg_class t ON t.oid = ix.indrelid
CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
WHERE t.relname = $1::text
  AND pg_table_is_visible(t.oid)
  AND ix.indisunique
  AND ix.indpred IS NULL
  AND k.ord <= ix.indnkeyatts
  AND NOT (0 = ANY (ix.indkey::int2[]))
ORDER BY ix.indisprimary DESC, ix.indexrelid, k.ord";

/// One column of a table, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ColumnDescriptor {
    /// Zero-based declaration position.
    pub ordinal: i64,
    pub name: String,
    /// Normalized to TEXT, INTEGER or TIMESTAMP where the engine type maps to one.
    pub declared_type: String,
    pub not_null: bool,
    pub default_expr: Option<String>,
    pub is_primary_key: bool,
}

impl ColumnDescriptor {
    pub const FIELD_NAMES: [&'static str; 6] =
        ["ordinal", "name", "declared_type", "not_null", "default_expr", "is_primary_key"];

    /// Column names of a legacy `PRAGMA table_info` row.
    pub const LEGACY_KEYS: [&'static str; 6] = ["cid", "name", "type", "notnull", "dflt_value", "pk"];

    /// Decodes a `table_info`-shaped row. `pk` may be a key position or a 0/1 flag.
    pub fn from_row(row: &CompatRow) -> Result<Self, CompatError> {
        let declared: Option<String> = row.get("type")?;
        Ok(Self {
            ordinal: row.get("cid")?,
            name: row.get("name")?,
            declared_type: normalize_declared_type(declared.as_deref().unwrap_or("")),
            not_null: row.get("notnull")?,
            default_expr: row.get("dflt_value")?,
            is_primary_key: row.get::<i64, _>("pk")? > 0,
        })
    }

    /// Values in [`Self::LEGACY_KEYS`] order.
    #[must_use]
    pub fn legacy_values(&self, pk_position: i64) -> Vec<Value> {
        vec![
            Value::Integer(self.ordinal),
            Value::Text(self.name.clone()),
            Value::Text(self.declared_type.clone()),
            Value::Integer(i64::from(self.not_null)),
            self.default_expr.clone().map_or(Value::Null, Value::Text),
            Value::Integer(pk_position),
        ]
    }

    /// The legacy six-key row for this column.
    #[must_use]
    pub fn to_row(&self) -> CompatRow {
        let keys: Vec<String> = Self::LEGACY_KEYS.iter().map(|k| (*k).to_string()).collect();
        CompatRow::from_positional(&keys, self.legacy_values(i64::from(self.is_primary_key)))
    }
}

/// A set of columns the engine enforces as unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueKey {
    pub primary: bool,
    pub columns: Vec<String>,
}

/// Maps an engine type name onto the legacy vocabulary; unknown types are upper-cased.
#[must_use]
pub fn normalize_declared_type(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    let base = lowered.split('(').next().unwrap_or("").trim();
    match base {
        "text" | "character varying" | "varchar" | "character" | "char" | "nvarchar" | "clob"
        | "json" | "jsonb" => "TEXT".to_string(),
        "integer" | "int" | "bigint" | "smallint" | "int2" | "int4" | "int8" | "tinyint"
        | "mediumint" | "boolean" | "bool" => "INTEGER".to_string(),
        "datetime" | "timestamp" | "timestamp without time zone" => "TIMESTAMP".to_string(),
        _ => raw.trim().to_ascii_uppercase(),
    }
}

fn query_rows(driver: &mut dyn Driver, sql: &str, params: &[Value]) -> Result<Vec<CompatRow>, CompatError> {
    let outcome = driver.execute(sql, params)?;
    let columns = outcome.columns;
    Ok(outcome.rows.into_iter().map(|row| row.into_compat(&columns)).collect())
}

/// Raw `table_info` rows: native on SQLite, catalog-derived on PostgreSQL.
/// On PostgreSQL the `pk` column carries the 1-based position in the primary key.
fn table_info_rows(driver: &mut dyn Driver, table: &str) -> Result<Vec<CompatRow>, CompatError> {
    match driver.mode() {
        BackendMode::Sqlite => query_rows(driver, &format!("PRAGMA table_info({})", quote_ident(table)), &[]),
        BackendMode::Postgres => query_rows(driver, PG_TABLE_INFO, &[Value::from(table)]),
    }
}

/// Columns of `table` in declaration order, with zero-based ordinals.
/// An unknown table yields an empty list.
pub fn describe_columns(driver: &mut dyn Driver, table: &str) -> Result<Vec<ColumnDescriptor>, CompatError> {
    let rows = table_info_rows(driver, table)?;
    rows.iter()
        .enumerate()
        .map(|(ordinal, row)| {
            let mut column = ColumnDescriptor::from_row(row)?;
            column.ordinal = i64::try_from(ordinal).unwrap_or(i64::MAX);
            Ok(column)
        })
        .collect()
}

/// Unique keys of `table`: the primary key first (if any), then unique indexes.
/// Partial and expression indexes are left out.
pub fn describe_unique_keys(driver: &mut dyn Driver, table: &str) -> Result<Vec<UniqueKey>, CompatError> {
    match driver.mode() {
        BackendMode::Sqlite => sqlite_unique_keys(driver, table),
        BackendMode::Postgres => pg_unique_keys(driver, table),
    }
}

fn primary_key_from_info(rows: &[CompatRow]) -> Result<Option<UniqueKey>, CompatError> {
    let mut members = Vec::new();
    for row in rows {
        let position: i64 = row.get("pk")?;
        if position > 0 {
            members.push((position, row.get::<String, _>("name")?));
        }
    }
    members.sort_by_key(|(position, _)| *position);
    Ok((!members.is_empty())
        .then(|| UniqueKey { primary: true, columns: members.into_iter().map(|(_, name)| name).collect() }))
}

fn sqlite_unique_keys(driver: &mut dyn Driver, table: &str) -> Result<Vec<UniqueKey>, CompatError> {
    let info = table_info_rows(driver, table)?;
    let mut keys: Vec<UniqueKey> = primary_key_from_info(&info)?.into_iter().collect();

    let indexes = query_rows(driver, &format!("PRAGMA index_list({})", quote_ident(table)), &[])?;
    for index in &indexes {
        let unique: bool = index.get("unique")?;
        let origin: String = index.get("origin")?;
        let partial: bool = index.get("partial")?;
        if !unique || origin == "pk" || partial {
            continue;
        }
        let name: String = index.get("name")?;
        let members = query_rows(driver, &format!("PRAGMA index_info({})", quote_ident(&name)), &[])?;
        let names = members
            .iter()
            .map(|m| m.get::<Option<String>, _>("name"))
            .collect::<Result<Vec<_>, _>>()?;
        // A NULL member name marks an expression index.
        if let Some(columns) = names.into_iter().collect::<Option<Vec<String>>>() {
            keys.push(UniqueKey { primary: false, columns });
        }
    }
    Ok(keys)
}

fn pg_unique_keys(driver: &mut dyn Driver, table: &str) -> Result<Vec<UniqueKey>, CompatError> {
    let rows = query_rows(driver, PG_UNIQUE_KEYS, &[Value::from(table)])?;
    let mut keys: Vec<(i64, UniqueKey)> = Vec::new();
    for row in &rows {
        let index_id: i64 = row.get("index_id")?;
        let column: String = row.get("column_name")?;
        match keys.last_mut() {
            Some((id, key)) if *id == index_id => key.columns.push(column),
            _ => {
                let primary: bool = row.get("is_primary")?;
                keys.push((index_id, UniqueKey { primary, columns: vec![column] }));
            }
        }
    }
    Ok(keys.into_iter().map(|(_, key)| key).collect())
}

/// Handles introspection pseudo-commands that the client/server backend cannot run.
///
/// Returns `Some(outcome)` when `sql` was answered here and must not reach the
/// driver: `PRAGMA table_info(t)` becomes a catalog query reshaped into the
/// legacy rows, and any other `PRAGMA` is an empty result. On SQLite nothing is
/// intercepted.
pub fn intercept(driver: &mut dyn Driver, sql: &str) -> Result<Option<DriverOutcome>, CompatError> {
    if driver.mode().is_embedded() {
        return Ok(None);
    }
    match recognize(sql) {
        Some(PseudoCommand::TableInfo(table)) => {
            debug!(table = %table, "emulating table_info from the catalog");
            let rows = table_info_rows(driver, &table)?;
            let mut native = Vec::with_capacity(rows.len());
            for (ordinal, row) in rows.iter().enumerate() {
                let mut column = ColumnDescriptor::from_row(row)?;
                column.ordinal = i64::try_from(ordinal).unwrap_or(i64::MAX);
                native.push(NativeRow::Positional(column.legacy_values(row.get("pk")?)));
            }
            let columns = ColumnDescriptor::LEGACY_KEYS.iter().map(|k| (*k).to_string()).collect();
            Ok(Some(DriverOutcome::with_rows(columns, native)))
        }
        Some(PseudoCommand::OtherPragma) => {
            debug!(sql, "pragma ignored on postgres");
            Ok(Some(DriverOutcome::empty()))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests;
