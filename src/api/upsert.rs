use crate::api::connection::Connection;
use crate::core::common::CompatError;
use crate::core::introspect;
use crate::core::upsert::{Fields, SchemaCache, UpsertPlan, UpsertRegistry};
use tracing::{debug, warn};

/// Inserts `fields` into `table`, or updates the existing row that conflicts on
/// `conflict_columns`.
///
/// Keys of `fields` that are not columns of `table` are dropped. Without
/// `conflict_columns` (or with an empty list) the first unique key covered by the supplied columns is
/// used (primary key first). Without `update_columns` every supplied column
/// except the conflict columns is updated. Returns the affected row count: 1
/// for an insert or an update, 0 when the engine reports a no-op.
///
/// # Errors
/// [`CompatError::ConflictTarget`] when no unique constraint covers the
/// conflict columns; any other driver error unchanged.
pub fn upsert(
    conn: &mut Connection,
    table: &str,
    fields: &Fields,
    conflict_columns: Option<&[String]>,
    update_columns: Option<&[String]>,
) -> Result<u64, CompatError> {
    let driver = conn.driver_mut()?;
    let columns = introspect::describe_columns(driver, table)?;
    let conflict_columns = conflict_columns.filter(|columns| !columns.is_empty());
    let keys = if conflict_columns.is_some() {
        Vec::new()
    } else {
        introspect::describe_unique_keys(driver, table)?
    };
    let plan = UpsertPlan::build(table, &columns, &keys, fields, conflict_columns, update_columns)?;
    execute_plan(conn, &plan)
}

/// [`upsert`] with the table schema taken from (and stored in) `cache`.
pub fn upsert_cached(
    conn: &mut Connection,
    cache: &mut SchemaCache,
    table: &str,
    fields: &Fields,
    conflict_columns: Option<&[String]>,
    update_columns: Option<&[String]>,
) -> Result<u64, CompatError> {
    let (columns, keys) = cache.schema(conn.driver_mut()?, table)?;
    let plan = UpsertPlan::build(table, columns, keys, fields, conflict_columns, update_columns)?;
    execute_plan(conn, &plan)
}

/// [`upsert`] with conflict and update columns taken from `registry` when it
/// has a rule for `table`.
pub fn upsert_registered(
    conn: &mut Connection,
    registry: &UpsertRegistry,
    table: &str,
    fields: &Fields,
) -> Result<u64, CompatError> {
    match registry.get(table) {
        Some(rule) => upsert(conn, table, fields, Some(rule.conflict_columns.as_slice()), rule.update_columns.as_deref()),
        None => {
            warn!(table, "no upsert rule registered, detecting conflict columns");
            upsert(conn, table, fields, None, None)
        }
    }
}

/// Upserts each payload in turn and returns the summed affected row count.
/// The first failure is returned; earlier rows stay in the open transaction.
pub fn bulk_upsert(
    conn: &mut Connection,
    table: &str,
    rows: &[Fields],
    conflict_columns: Option<&[String]>,
    update_columns: Option<&[String]>,
) -> Result<u64, CompatError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut cache = SchemaCache::new();
    rows.iter().try_fold(0, |total: u64, fields| -> Result<u64, CompatError> {
        Ok(total + upsert_cached(conn, &mut cache, table, fields, conflict_columns, update_columns)?)
    })
}

fn execute_plan(conn: &mut Connection, plan: &UpsertPlan) -> Result<u64, CompatError> {
    debug!(table = %plan.table, sql = %plan.sql, "upsert");
    let mut cursor = conn.cursor();
    cursor.execute(&plan.sql, &plan.params).map_err(|err| plan.classify_error(err))?;
    Ok(cursor.rowcount().unwrap_or(0))
}
