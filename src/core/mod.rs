pub mod common;
pub mod config;
pub mod connection;
pub mod introspect;
pub mod query;
pub mod upsert;
pub use self::config::CompatConfig;
