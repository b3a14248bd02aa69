use crate::api::connection::Connection;
use crate::core::common::types::{BackendMode, CompatRow, Value};
use crate::core::common::CompatError;
use crate::core::connection::{Driver, DriverOutcome};
use crate::core::introspect;
use crate::core::query::sql::translate;
use crate::core::query::sql::translator::{has_returning_clause, is_insert};
use std::collections::VecDeque;
use tracing::{debug, warn};

const BATCH_SAVEPOINT: &str = "sp_batch";
const ROW_SAVEPOINT: &str = "sp_execmany";

/// Where a cursor is in its execute/fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Nothing executed yet.
    Idle,
    /// The last statement left rows to fetch.
    Fetchable,
    /// The last statement's rows are used up (or it returned none).
    Exhausted,
    /// Terminal.
    Closed,
}

/// Result of [`Cursor::execute_many`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Parameter sets handed in.
    pub submitted: usize,
    /// Parameter sets that executed and are part of the open transaction.
    pub applied: usize,
    /// Zero-based positions of the parameter sets rolled back and skipped.
    pub skipped: Vec<usize>,
}

/// Statement execution and row fetching over a borrowed [`Connection`].
///
/// Statements are written in the embedded (SQLite) dialect and translated for
/// the attached backend. Fetched rows are detached [`CompatRow`] values.
pub struct Cursor<'conn> {
    conn: &'conn mut Connection,
    state: CursorState,
    columns: Vec<String>,
    buffer: VecDeque<CompatRow>,
    rowcount: Option<u64>,
    last_insert_id: Option<i64>,
}

impl<'conn> Cursor<'conn> {
    pub(crate) fn new(conn: &'conn mut Connection) -> Self {
        Self {
            conn,
            state: CursorState::Idle,
            columns: Vec::new(),
            buffer: VecDeque::new(),
            rowcount: None,
            last_insert_id: None,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn mode(&self) -> BackendMode {
        self.conn.mode()
    }

    /// Result column names of the last statement.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Row count reported by the driver for the last statement, if any.
    pub fn rowcount(&self) -> Option<u64> {
        self.rowcount
    }

    /// Identifier captured by the last [`Cursor::execute_with_identifier`] call.
    /// Plain `execute` calls neither read nor clear it.
    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    fn ensure_open(&self) -> Result<(), CompatError> {
        if self.state == CursorState::Closed {
            return Err(CompatError::CursorClosed);
        }
        Ok(())
    }

    /// Runs `sql` and buffers its rows for fetching.
    ///
    /// A recognized introspection pseudo-command is answered by the Schema
    /// Introspector instead of the server on PostgreSQL.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<&mut Self, CompatError> {
        self.ensure_open()?;
        self.reset();
        let outcome = run_statement(self.conn.driver_mut()?, sql, params)?;
        self.load(outcome);
        Ok(self)
    }

    /// Runs an insert and captures the new row's identifier.
    ///
    /// On PostgreSQL an insert without `RETURNING` gets ` RETURNING <id_column>`
    /// appended and the returned row is consumed; an insert that already returns
    /// rows keeps them fetchable and the identifier is read from the first one.
    /// On SQLite the engine's last inserted rowid is used.
    pub fn execute_with_identifier(
        &mut self,
        sql: &str,
        params: &[Value],
        id_column: &str,
    ) -> Result<&mut Self, CompatError> {
        self.ensure_open()?;
        self.reset();
        let driver = self.conn.driver_mut()?;
        match driver.mode() {
            BackendMode::Sqlite => {
                let outcome = run_statement(driver, sql, params)?;
                let id = driver.last_insert_rowid();
                self.load(outcome);
                self.last_insert_id = id;
            }
            BackendMode::Postgres if is_insert(sql) && !has_returning_clause(sql) => {
                let statement = format!("{} RETURNING {}", sql.trim_end().trim_end_matches(';'), id_column);
                let outcome = run_statement(driver, &statement, params)?;
                self.load(outcome);
                let returned = self.next_row();
                self.last_insert_id = returned.as_ref().and_then(|row| identifier_of(row, id_column));
            }
            BackendMode::Postgres => {
                let outcome = run_statement(driver, sql, params)?;
                self.load(outcome);
                self.last_insert_id = self.buffer.front().and_then(|row| identifier_of(row, id_column));
            }
        }
        Ok(self)
    }

    /// Runs `sql` once per parameter set.
    ///
    /// On PostgreSQL a failing batch is rolled back to a savepoint and retried
    /// row by row, each row inside its own savepoint: rows that fail are logged
    /// and skipped, the rest stay in the open transaction. On SQLite the first
    /// error is returned.
    pub fn execute_many(&mut self, sql: &str, batch: &[Vec<Value>]) -> Result<BatchOutcome, CompatError> {
        self.ensure_open()?;
        self.reset();
        let driver = self.conn.driver_mut()?;
        let mode = driver.mode();
        let translated = translate(sql, mode);
        debug!(sql = %translated, rows = batch.len(), "executing batch");

        let (affected, outcome) = match mode {
            BackendMode::Sqlite => {
                let affected = driver.execute_many(&translated, batch)?;
                (affected, BatchOutcome { submitted: batch.len(), applied: batch.len(), skipped: Vec::new() })
            }
            BackendMode::Postgres => batch_with_savepoints(driver, &translated, batch)?,
        };

        self.rowcount = Some(affected);
        self.state = CursorState::Exhausted;
        Ok(outcome)
    }

    /// Next row, or `None` when there is nothing (left) to fetch.
    pub fn fetch_one(&mut self) -> Result<Option<CompatRow>, CompatError> {
        self.ensure_open()?;
        Ok(self.next_row())
    }

    /// Up to `size` rows.
    pub fn fetch_many(&mut self, size: usize) -> Result<Vec<CompatRow>, CompatError> {
        self.ensure_open()?;
        let take = size.min(self.buffer.len());
        let rows = self.buffer.drain(..take).collect();
        self.settle();
        Ok(rows)
    }

    /// All remaining rows.
    pub fn fetch_all(&mut self) -> Result<Vec<CompatRow>, CompatError> {
        self.ensure_open()?;
        let rows = self.buffer.drain(..).collect();
        self.settle();
        Ok(rows)
    }

    /// Takes the remaining rows as an iterator. Yields nothing once closed.
    pub fn rows(&mut self) -> std::collections::vec_deque::IntoIter<CompatRow> {
        let rows = std::mem::take(&mut self.buffer);
        self.settle();
        rows.into_iter()
    }

    /// Drops buffered rows. Further use returns [`CompatError::CursorClosed`].
    pub fn close(&mut self) {
        self.buffer.clear();
        self.state = CursorState::Closed;
    }

    fn next_row(&mut self) -> Option<CompatRow> {
        let row = self.buffer.pop_front();
        self.settle();
        row
    }

    fn settle(&mut self) {
        if self.state == CursorState::Fetchable && self.buffer.is_empty() {
            self.state = CursorState::Exhausted;
        }
    }

    fn reset(&mut self) {
        self.columns.clear();
        self.buffer.clear();
        self.rowcount = None;
        self.state = CursorState::Idle;
    }

    fn load(&mut self, outcome: DriverOutcome) {
        let DriverOutcome { columns, rows, rows_affected } = outcome;
        self.buffer = rows.into_iter().map(|row| row.into_compat(&columns)).collect();
        self.columns = columns;
        self.rowcount = rows_affected;
        self.state = if self.buffer.is_empty() { CursorState::Exhausted } else { CursorState::Fetchable };
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("mode", &self.conn.mode())
            .field("state", &self.state)
            .field("columns", &self.columns)
            .field("buffered", &self.buffer.len())
            .field("rowcount", &self.rowcount)
            .field("last_insert_id", &self.last_insert_id)
            .finish()
    }
}

/// Interception, translation and execution of one statement.
fn run_statement(driver: &mut dyn Driver, sql: &str, params: &[Value]) -> Result<DriverOutcome, CompatError> {
    if let Some(outcome) = introspect::intercept(driver, sql)? {
        return Ok(outcome);
    }
    let translated = translate(sql, driver.mode());
    if translated != sql {
        debug!(original = sql, translated = %translated, "statement translated");
    }
    driver.execute(&translated, params)
}

fn identifier_of(row: &CompatRow, id_column: &str) -> Option<i64> {
    row.value_of(id_column).or_else(|_| row.value_at(0)).ok().and_then(Value::as_i64)
}

fn savepoint(driver: &mut dyn Driver, command: &str, name: &str) -> Result<(), CompatError> {
    driver.execute(&format!("{command} {name}"), &[]).map(|_| ())
}

/// Errors that belong to one row and leave the connection usable.
fn is_row_failure(err: &CompatError) -> bool {
    err.is_driver_error() || matches!(err, CompatError::Bind { .. })
}

fn batch_with_savepoints(
    driver: &mut dyn Driver,
    sql: &str,
    batch: &[Vec<Value>],
) -> Result<(u64, BatchOutcome), CompatError> {
    let mut outcome = BatchOutcome { submitted: batch.len(), ..BatchOutcome::default() };

    savepoint(driver, "SAVEPOINT", BATCH_SAVEPOINT)?;
    match driver.execute_many(sql, batch) {
        Ok(affected) => {
            savepoint(driver, "RELEASE SAVEPOINT", BATCH_SAVEPOINT)?;
            outcome.applied = batch.len();
            return Ok((affected, outcome));
        }
        Err(err) if is_row_failure(&err) => {
            debug!(error = %err, "batch failed, retrying row by row");
            savepoint(driver, "ROLLBACK TO SAVEPOINT", BATCH_SAVEPOINT)?;
            savepoint(driver, "RELEASE SAVEPOINT", BATCH_SAVEPOINT)?;
        }
        Err(err) => return Err(err),
    }

    let mut affected = 0;
    for (index, params) in batch.iter().enumerate() {
        savepoint(driver, "SAVEPOINT", ROW_SAVEPOINT)?;
        match driver.execute(sql, params) {
            Ok(result) => {
                savepoint(driver, "RELEASE SAVEPOINT", ROW_SAVEPOINT)?;
                affected += result.rows_affected.unwrap_or(0);
                outcome.applied += 1;
            }
            Err(err) if is_row_failure(&err) => {
                warn!(row = index, error = %err, "skipping batch row");
                savepoint(driver, "ROLLBACK TO SAVEPOINT", ROW_SAVEPOINT)?;
                savepoint(driver, "RELEASE SAVEPOINT", ROW_SAVEPOINT)?;
                outcome.skipped.push(index);
            }
            Err(err) => return Err(err),
        }
    }
    Ok((affected, outcome))
}
