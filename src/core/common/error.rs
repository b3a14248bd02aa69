use crate::core::common::types::BackendMode;
use std::fmt;

/// Boxed native error kept as the `source()` of a [`DriverError`].
pub type NativeError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error raised by the physical database driver.
///
/// The native message is carried verbatim; the layer never rewrites it.
#[derive(Debug)]
pub struct DriverError {
    /// Backend that produced the error.
    pub backend: BackendMode,
    /// SQLite extended result code or PostgreSQL SQLSTATE, when the driver exposes one.
    pub code: Option<String>,
    /// Native error message.
    pub message: String,
    /// The native error value.
    pub native: Option<NativeError>,
}

impl DriverError {
    /// Builds a driver error without a native source.
    #[must_use]
    pub fn new(backend: BackendMode, code: Option<String>, message: impl Into<String>) -> Self {
        Self { backend, code, message: message.into(), native: None }
    }

    /// Returns true if the native code equals `code`.
    #[must_use]
    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} error [{}]: {}", self.backend, code, self.message),
            None => write!(f, "{} error: {}", self.backend, self.message),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.native.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(ffi, _) => Some(ffi.extended_code.to_string()),
            _ => None,
        };
        Self { backend: BackendMode::Sqlite, code, message: err.to_string(), native: Some(Box::new(err)) }
    }
}

impl From<postgres::Error> for DriverError {
    fn from(err: postgres::Error) -> Self {
        let code = err.code().map(|state| state.code().to_string());
        // The top-level Display of a server error is just "db error"; the detail lives in as_db_error.
        let message = err.as_db_error().map_or_else(|| err.to_string(), |db| db.message().to_string());
        Self { backend: BackendMode::Postgres, code, message, native: Some(Box::new(err)) }
    }
}

#[derive(Debug)]
pub enum CompatError {
    Driver(DriverError),
    ConflictTarget { table: String, columns: Vec<String>, source: DriverError },
    IndexOutOfRange { index: usize, len: usize },
    MissingKey(String),
    Bind { index: usize, message: String },
    Decode { column: String, message: String },
    CursorClosed,
    ConnectionClosed,
    InvalidInput(String),
    Configuration(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for CompatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Driver(e) => write!(f, "{}", e),
            Self::ConflictTarget { table, columns, source } => write!(
                f,
                "No unique constraint on {} covers conflict columns ({}): {}",
                table,
                columns.join(", "),
                source
            ),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "row index out of range: {} (row has {} columns)", index, len)
            }
            Self::MissingKey(key) => write!(f, "no such column in row: {}", key),
            Self::Bind { index, message } => write!(f, "Cannot bind parameter {}: {}", index + 1, message),
            Self::Decode { column, message } => write!(f, "Cannot decode column {}: {}", column, message),
            Self::CursorClosed => write!(f, "Cursor is closed"),
            Self::ConnectionClosed => write!(f, "Connection is closed"),
            Self::InvalidInput(s) => write!(f, "Invalid input: {}", s),
            Self::Configuration(s) => write!(f, "Configuration error: {}", s),
            Self::Io(e) => write!(f, "IO Error: {}", e),
            Self::Json(e) => write!(f, "JSON Serialization/Deserialization Error: {}", e),
        }
    }
}

impl std::error::Error for CompatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Driver(e) => Some(e),
            Self::ConflictTarget { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl CompatError {
    /// True for errors that came from the physical database, including
    /// conflict-target failures.
    #[must_use]
    pub const fn is_driver_error(&self) -> bool {
        matches!(self, Self::Driver(_) | Self::ConflictTarget { .. })
    }

    /// The underlying driver error, if any.
    #[must_use]
    pub const fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Driver(e) | Self::ConflictTarget { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl From<DriverError> for CompatError {
    fn from(err: DriverError) -> Self {
        Self::Driver(err)
    }
}

impl From<rusqlite::Error> for CompatError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Driver(err.into())
    }
}

impl From<postgres::Error> for CompatError {
    fn from(err: postgres::Error) -> Self {
        Self::Driver(err.into())
    }
}

impl From<std::io::Error> for CompatError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for CompatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}
