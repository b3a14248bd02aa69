pub mod backend;
pub mod row;
pub mod value;

pub use backend::BackendMode;
pub use row::{CompatRow, RowIndex};
pub use value::{parse_timestamp, FromValue, Value, SQLITE_TIMESTAMP_FORMAT};
