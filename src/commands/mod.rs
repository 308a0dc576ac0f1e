// ABOUTME: Command implementations behind the CLI subcommands
// ABOUTME: Exports compare-tables, compare/sync-data, stream-data and show-tables

pub mod compare_tables;
pub mod show_tables;
pub mod stream_data;
pub mod sync_data;

pub use compare_tables::compare_tables;
pub use show_tables::show_tables;
pub use stream_data::stream_data;
pub use sync_data::{compare_data, sync_data};

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::error_log::SyncErrorLog;
use crate::progress;
use crate::sync::SyncEngine;

/// Result of a command that can detect differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    InSync,
    Changed,
}

impl Outcome {
    pub fn from_changed(changed: bool) -> Self {
        if changed {
            Outcome::Changed
        } else {
            Outcome::InSync
        }
    }

    /// Process exit code, 1 when differences were found.
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::InSync => 0,
            Outcome::Changed => 1,
        }
    }
}

/// Engine with its progress task, wired from the configuration.
pub(crate) fn build_engine(
    config: &AppConfig,
    error_log_override: Option<PathBuf>,
    status_line: bool,
) -> Result<(SyncEngine, JoinHandle<()>)> {
    let tz = config.sync.tz()?;
    let path = error_log_override.unwrap_or_else(|| config.sync.error_log.clone());
    let error_log = Arc::new(SyncErrorLog::new(path, tz));
    let (handle, task) = progress::spawn(status_line);
    Ok((SyncEngine::new(&config.sync, handle, error_log), task))
}
