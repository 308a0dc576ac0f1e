// ABOUTME: Library root for sqlmirror - cross-dialect schema compare and data sync
// ABOUTME: Exposes connectors, schema comparison, merge-diff sync, CDC streaming and progress

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod error_log;
pub mod progress;
pub mod schema;
pub mod stream;
pub mod sync;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use config::AppConfig;
pub use db::{Connector, Dialect};
pub use error::SyncError;
pub use schema::{Column, ColumnKind, Database, SqlType, Table};
pub use sync::{KeyRange, Row, SyncEngine, SyncMode};
