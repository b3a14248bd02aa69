use super::{is_dml, Driver, DriverOutcome, NativeRow};
use crate::core::common::types::{BackendMode, Value, SQLITE_TIMESTAMP_FORMAT};
use crate::core::common::CompatError;
use crate::core::config::SqliteConfig;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// SQLite connection through `rusqlite`.
pub struct SqliteDriver {
    conn: Option<Connection>,
}

impl SqliteDriver {
    /// Opens (or creates) the database file and applies the configured pragmas.
    /// The path `:memory:` opens a private in-memory database.
    #[instrument(skip_all, fields(path = %config.path.display()))]
    pub fn open(config: &SqliteConfig) -> Result<Self, CompatError> {
        let conn = if config.path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.path)?
        };
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        if !config.pragmas.is_empty() {
            conn.execute_batch(&config.pragmas.join(";\n"))?;
        }
        info!(backend = "sqlite", "connection opened");
        Ok(Self { conn: Some(conn) })
    }

    /// Wraps an already-open `rusqlite` connection as is.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Some(conn) }
    }

    fn conn(&self) -> Result<&Connection, CompatError> {
        self.conn.as_ref().ok_or(CompatError::ConnectionClosed)
    }

    fn begin_implicit(conn: &Connection, sql: &str) -> Result<(), CompatError> {
        if conn.is_autocommit() && is_dml(sql) {
            conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }
}

impl Driver for SqliteDriver {
    fn mode(&self) -> BackendMode {
        BackendMode::Sqlite
    }

    #[instrument(skip_all, fields(backend = "sqlite"))]
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<DriverOutcome, CompatError> {
        let conn = self.conn()?;
        Self::begin_implicit(conn, sql)?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        if columns.is_empty() {
            let changed = stmt.execute(params_from_iter(params.iter()))?;
            debug!(rows = changed, "statement executed");
            return Ok(DriverOutcome::affected(changed as u64));
        }

        let readonly = stmt.readonly();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut fetched = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..columns.len())
                .map(|i| row.get_ref(i).map(value_from_ref))
                .collect::<Result<Vec<_>, _>>()?;
            fetched.push(NativeRow::Positional(values));
        }
        drop(rows);
        drop(stmt);

        // INSERT ... RETURNING reports its changes; plain queries report none.
        let rows_affected = if readonly { None } else { u64::try_from(conn.changes()).ok() };
        Ok(DriverOutcome { columns, rows: fetched, rows_affected })
    }

    #[instrument(skip_all, fields(backend = "sqlite", batch = batch.len()))]
    fn execute_many(&mut self, sql: &str, batch: &[Vec<Value>]) -> Result<u64, CompatError> {
        let conn = self.conn()?;
        Self::begin_implicit(conn, sql)?;
        let mut stmt = conn.prepare(sql)?;
        let mut total = 0u64;
        for params in batch {
            total += stmt.execute(params_from_iter(params.iter()))? as u64;
        }
        Ok(total)
    }

    fn last_insert_rowid(&self) -> Option<i64> {
        self.conn.as_ref().map(Connection::last_insert_rowid)
    }

    fn commit(&mut self) -> Result<(), CompatError> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), CompatError> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), CompatError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| CompatError::from(e))?;
            info!(backend = "sqlite", "connection closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(text) => Value::Text(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::Blob(blob.to_vec()),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as SqlValue;
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Boolean(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Timestamp(ts) => {
                ToSqlOutput::Owned(SqlValue::Text(ts.format(SQLITE_TIMESTAMP_FORMAT).to_string()))
            }
            Value::Json(v) => ToSqlOutput::Owned(SqlValue::Text(v.to_string())),
        })
    }
}
