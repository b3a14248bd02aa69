pub mod error;
pub use error::{CompatError, DriverError};
pub mod types;
