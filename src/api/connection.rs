use crate::api::cursor::Cursor;
use crate::core::common::types::{BackendMode, CompatRow, Value};
use crate::core::common::CompatError;
use crate::core::config::{CompatConfig, SqliteConfig};
use crate::core::connection::{Driver, PostgresDriver, SqliteDriver};
use crate::core::introspect::{self, ColumnDescriptor, UniqueKey};
use tracing::warn;

/// Opens a connection. `target` is a database file path (`:memory:` allowed)
/// for SQLite and a connection string for PostgreSQL.
///
/// SQLite connections get the default busy timeout and pragmas of
/// [`SqliteConfig::default`].
///
/// # Errors
/// Returns the driver's error if the database cannot be opened or reached.
pub fn open(mode: BackendMode, target: &str) -> Result<Connection, CompatError> {
    let driver: Box<dyn Driver> = match mode {
        BackendMode::Sqlite => {
            let config = SqliteConfig { path: target.into(), ..SqliteConfig::default() };
            Box::new(SqliteDriver::open(&config)?)
        }
        BackendMode::Postgres => Box::new(PostgresDriver::connect(target)?),
    };
    Ok(Connection::from_driver(driver))
}

/// Opens a connection for a validated [`CompatConfig`].
pub fn open_config(config: &CompatConfig) -> Result<Connection, CompatError> {
    config.validate()?;
    let driver: Box<dyn Driver> = match config.backend {
        BackendMode::Sqlite => Box::new(SqliteDriver::open(&config.sqlite)?),
        BackendMode::Postgres => Box::new(PostgresDriver::connect(&config.target())?),
    };
    Ok(Connection::from_driver(driver))
}

/// A backend-neutral database connection.
///
/// Owns the physical driver and the backend mode fixed at open time. The
/// physical connection is released exactly once: by [`Connection::close`],
/// by [`Connection::scoped`], or (after a rollback) when the wrapper is dropped.
pub struct Connection {
    driver: Box<dyn Driver>,
    mode: BackendMode,
    closed: bool,
}

impl Connection {
    /// Wraps any [`Driver`], e.g. one built around an existing client.
    pub fn from_driver(driver: Box<dyn Driver>) -> Self {
        let mode = driver.mode();
        let closed = driver.is_closed();
        Self { driver, mode, closed }
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// A fresh cursor borrowing this connection.
    pub fn cursor(&mut self) -> Cursor<'_> {
        Cursor::new(self)
    }

    /// Executes one statement on a fresh cursor and returns all of its rows.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Vec<CompatRow>, CompatError> {
        let mut cursor = self.cursor();
        cursor.execute(sql, params)?;
        cursor.fetch_all()
    }

    /// Columns of `table` in declaration order.
    pub fn describe_columns(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>, CompatError> {
        introspect::describe_columns(self.driver_mut()?, table)
    }

    /// Primary key and unique indexes of `table`.
    pub fn describe_unique_keys(&mut self, table: &str) -> Result<Vec<UniqueKey>, CompatError> {
        introspect::describe_unique_keys(self.driver_mut()?, table)
    }

    pub fn commit(&mut self) -> Result<(), CompatError> {
        self.driver_mut()?.commit()
    }

    pub fn rollback(&mut self) -> Result<(), CompatError> {
        self.driver_mut()?.rollback()
    }

    /// Releases the physical connection. An open transaction is not committed.
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), CompatError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.driver.close()
    }

    /// Runs `work` and then commits if it returned `Ok` or rolls back if it
    /// returned `Err`. The connection is closed either way. When `work` fails,
    /// its error is returned and cleanup failures are only logged.
    pub fn scoped<T, E, F>(mut self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<CompatError>,
    {
        let result = work(&mut self);
        match result {
            Ok(value) => {
                let committed = self.commit();
                if committed.is_err() {
                    if let Err(err) = self.rollback() {
                        warn!(error = %err, "rollback after failed commit failed");
                    }
                }
                let closed = self.close();
                committed?;
                closed?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!(error = %rollback_err, "rollback failed while leaving scope");
                }
                if let Err(close_err) = self.close() {
                    warn!(error = %close_err, "close failed while leaving scope");
                }
                Err(err)
            }
        }
    }

    pub(crate) fn driver_mut(&mut self) -> Result<&mut dyn Driver, CompatError> {
        if self.closed {
            return Err(CompatError::ConnectionClosed);
        }
        Ok(self.driver.as_mut())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(backend = %self.mode, "connection dropped without close, rolling back");
        if let Err(err) = self.driver.rollback() {
            warn!(error = %err, "rollback on drop failed");
        }
        self.closed = true;
        if let Err(err) = self.driver.close() {
            warn!(error = %err, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("mode", &self.mode).field("closed", &self.closed).finish()
    }
}
