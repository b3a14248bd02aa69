#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(clippy::cast_possible_truncation)]
#![warn(clippy::cast_possible_wrap)]
#![warn(clippy::cast_sign_loss)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![forbid(unsafe_code)]

//! # sqlcompat: one connection contract over SQLite and PostgreSQL
//!
//! `sqlcompat` lets code written against SQLite (its `?` placeholders, its
//! `datetime('now')` idioms, `PRAGMA table_info`, `lastrowid`) run unchanged
//! on PostgreSQL:
//! - statements are translated outside quoted literals only, and never on SQLite
//! - rows come back as detached values addressable by position and by name
//! - `PRAGMA table_info(<t>)` is answered from the PostgreSQL catalog
//! - inserted ids are read back through `RETURNING` or the native rowid
//! - batches survive a bad row through per-row savepoints
//! - upserts are generated from the live schema
//!
//! ```no_run
//! use sqlcompat::{open, BackendMode, Value};
//!
//! # fn main() -> sqlcompat::Result<()> {
//! let mut conn = open(BackendMode::Sqlite, "portal.db")?;
//! let mut cursor = conn.cursor();
//! cursor.execute_with_identifier("INSERT INTO notes (body) VALUES (?)", &[Value::from("hi")], "id")?;
//! let id = cursor.last_insert_id();
//! drop(cursor);
//! conn.commit()?;
//! conn.close()?;
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod core;

// Re-export key types for easier use by library consumers
pub use api::{bulk_upsert, open, open_config, upsert, upsert_cached, upsert_registered};
pub use api::{BatchOutcome, Connection, Cursor, CursorState};
pub use crate::core::common::types::{BackendMode, CompatRow, Value};
pub use crate::core::common::{CompatError, DriverError};
pub use crate::core::config::CompatConfig;
pub use crate::core::introspect::{ColumnDescriptor, UniqueKey};
pub use crate::core::upsert::{fields, Fields, SchemaCache, UpsertRegistry};

/// Core result type for the library
pub type Result<T> = std::result::Result<T, CompatError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn end_to_end_from_config_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_path = dir.path().join("portal.db");
        let mut file = NamedTempFile::new().expect("Failed to create temp config file");
        writeln!(
            file,
            "backend = \"sqlite\"\n[sqlite]\npath = {:?}\n[upsert.sync_state]\nconflict_columns = [\"id\"]\nupdate_columns = [\"last_full_sync\"]",
            db_path.display().to_string()
        )
        .expect("Failed to write config");

        let config = CompatConfig::load_from_file(file.path()).expect("Failed to load config");
        let registry = UpsertRegistry::from_config(&config);

        let mut conn = open_config(&config).expect("Failed to open connection");
        conn.execute(
            "CREATE TABLE sync_state (id INTEGER PRIMARY KEY, last_full_sync DATETIME DEFAULT (datetime('now')))",
            &[],
        )
        .expect("Failed to create table");
        let payload = fields([("id", Value::from(1)), ("last_full_sync", Value::from("2025-01-06 10:00:00"))]);
        assert_eq!(upsert_registered(&mut conn, &registry, "sync_state", &payload).expect("upsert"), 1);
        conn.commit().expect("commit");
        conn.close().expect("close");

        let mut conn = open(BackendMode::Sqlite, db_path.to_str().expect("utf-8 path")).expect("reopen");
        let columns = conn.describe_columns("sync_state").expect("describe");
        assert_eq!(columns[1].declared_type, "TIMESTAMP");
        let rows = conn.execute("SELECT last_full_sync FROM sync_state WHERE id = ?", &[Value::from(1)]).expect("select");
        assert_eq!(rows[0].get::<String, _>(0).expect("text"), "2025-01-06 10:00:00");
        conn.close().expect("close");
    }

    #[test]
    fn result_alias_carries_compat_error() {
        fn closed() -> Result<()> {
            let mut conn = open(BackendMode::Sqlite, ":memory:")?;
            conn.close()?;
            conn.commit()
        }
        assert!(matches!(closed(), Err(CompatError::ConnectionClosed)));
    }
}
