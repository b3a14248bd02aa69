//! Dialect-aware predicates over 0/1 flag columns.

use crate::core::common::types::BackendMode;

/// Predicate that is true when the flag `expr` is set.
///
/// PostgreSQL columns may be `boolean`, `integer` or text, so the value is
/// compared through its text form there.
#[must_use]
pub fn sql_is_active_true(expr: &str, mode: BackendMode) -> String {
    match mode {
        BackendMode::Postgres => format!("(LOWER(COALESCE({expr}::text, '0')) IN ('1','t','true'))"),
        BackendMode::Sqlite => format!("(COALESCE({expr}, 0) = 1)"),
    }
}

/// Predicate that is true when the flag `expr` is unset or NULL.
#[must_use]
pub fn sql_is_deleted_false(expr: &str, mode: BackendMode) -> String {
    match mode {
        BackendMode::Postgres => format!("(LOWER(COALESCE({expr}::text, '0')) NOT IN ('1','t','true'))"),
        BackendMode::Sqlite => format!("(COALESCE({expr}, 0) = 0)"),
    }
}
