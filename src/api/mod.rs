//! Public API of the compatibility layer.
//!
//! The entry points are [`open`] / [`open_config`], which return a
//! [`Connection`]; statements run through a [`Cursor`] borrowed from it and
//! come back as detached rows. [`upsert`] and friends build on the same
//! cursor path.

pub mod connection;
pub mod cursor;
pub mod upsert;

pub use connection::{open, open_config, Connection};
pub use cursor::{BatchOutcome, Cursor, CursorState};
pub use upsert::{bulk_upsert, upsert, upsert_cached, upsert_registered};
