// ABOUTME: stream-data commands - follow the source binlog and mirror each change
// ABOUTME: stream-data also runs the initial and nightly full syncs

use anyhow::Result;
use std::path::PathBuf;

use super::build_engine;
use crate::config::AppConfig;
use crate::stream::runner::{self, StreamOptions};

/// Stream changes until a fatal error; `nightly_sync` adds the full sync loop.
pub async fn stream_data(
    config: &AppConfig,
    table: Option<&str>,
    error_log: Option<PathBuf>,
    nightly_sync: bool,
) -> Result<()> {
    let pattern = table.unwrap_or("").trim().to_string();
    if pattern.is_empty() {
        tracing::info!("(stream-data) streaming all tables");
    } else {
        tracing::info!("(stream-data) streaming {}", pattern);
    }

    let (engine, _progress_task) = build_engine(config, error_log, config.sync.status_line)?;
    let options = StreamOptions {
        table_pattern: pattern,
        nightly_sync,
    };
    runner::run(config, engine, options).await
}
