//! A client/server driver that answers from a closure, for exercising the
//! PostgreSQL code paths without a server.

use super::{Driver, DriverOutcome};
use crate::core::common::types::{BackendMode, Value};
use crate::core::common::{CompatError, DriverError};
use std::sync::{Arc, Mutex};

pub(crate) type Handler = Box<dyn FnMut(&str, &[Value]) -> Result<DriverOutcome, CompatError> + Send>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Call {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Shared view of every statement the scripted driver received.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptLog(Arc<Mutex<Vec<Call>>>);

impl ScriptLog {
    fn push(&self, sql: &str, params: &[Value]) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push(Call { sql: sql.to_string(), params: params.to_vec() });
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn statements(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.sql).collect()
    }
}

pub(crate) struct ScriptedDriver {
    mode: BackendMode,
    handler: Handler,
    log: ScriptLog,
    closed: bool,
}

impl ScriptedDriver {
    pub fn postgres<F>(handler: F) -> (Self, ScriptLog)
    where
        F: FnMut(&str, &[Value]) -> Result<DriverOutcome, CompatError> + Send + 'static,
    {
        let log = ScriptLog::default();
        let driver =
            Self { mode: BackendMode::Postgres, handler: Box::new(handler), log: log.clone(), closed: false };
        (driver, log)
    }
}

/// A native client/server error with a SQLSTATE.
pub(crate) fn pg_error(code: &str, message: &str) -> CompatError {
    CompatError::Driver(DriverError::new(BackendMode::Postgres, Some(code.to_string()), message))
}

impl Driver for ScriptedDriver {
    fn mode(&self) -> BackendMode {
        self.mode
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<DriverOutcome, CompatError> {
        if self.closed {
            return Err(CompatError::ConnectionClosed);
        }
        self.log.push(sql, params);
        (self.handler)(sql, params)
    }

    fn execute_many(&mut self, sql: &str, batch: &[Vec<Value>]) -> Result<u64, CompatError> {
        let mut total = 0;
        for params in batch {
            total += self.execute(sql, params)?.rows_affected.unwrap_or(0);
        }
        Ok(total)
    }

    fn last_insert_rowid(&self) -> Option<i64> {
        None
    }

    fn commit(&mut self) -> Result<(), CompatError> {
        self.log.push("COMMIT", &[]);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), CompatError> {
        self.log.push("ROLLBACK", &[]);
        Ok(())
    }

    fn close(&mut self) -> Result<(), CompatError> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
