// ABOUTME: compare-data and sync-data commands - one bulk pass over all or one table
// ABOUTME: compare-data prints the statements it would run instead of executing them

use anyhow::Result;
use std::path::PathBuf;

use super::{build_engine, Outcome};
use crate::config::AppConfig;
use crate::schema::Database;
use crate::sync::BatchSummary;

async fn run_batch(
    config: &AppConfig,
    table: Option<&str>,
    error_log: Option<PathBuf>,
    dry_run: bool,
) -> Result<BatchSummary> {
    let tag = if dry_run { "(compare-data)" } else { "(sync-data)" };
    let pattern = table.unwrap_or("").trim();
    tracing::info!(
        "{} start [{}] {} --> {}",
        tag,
        if pattern.is_empty() { "all tables" } else { pattern },
        config.source.name,
        config.sink.name
    );

    let source = Database::open(&config.source, pattern).await?;
    let sink = Database::open(&config.sink, pattern).await?;

    // Dry runs write statements to stdout, keep the status line off it
    let status_line = config.sync.status_line && !dry_run;
    let (engine, progress_task) = build_engine(config, error_log, status_line)?;
    let result = engine.sync_all(&source, &sink, pattern, dry_run).await;
    drop(engine);
    let _ = progress_task.await;

    let summary = result?;
    tracing::info!(
        "{} complete: {} tables synced, {} skipped, {} inserts, {} updates, {} deletes, {} failures",
        tag,
        summary.tables_synced,
        summary.tables_skipped,
        summary.inserts,
        summary.updates,
        summary.deletes,
        summary.failures
    );
    Ok(summary)
}

/// Print the statements that would make the sink equal to the source.
pub async fn compare_data(
    config: &AppConfig,
    table: Option<&str>,
    error_log: Option<PathBuf>,
) -> Result<Outcome> {
    let summary = run_batch(config, table, error_log, true).await?;
    Ok(Outcome::from_changed(summary.changes() > 0))
}

/// Make the sink equal to the source.
pub async fn sync_data(
    config: &AppConfig,
    table: Option<&str>,
    error_log: Option<PathBuf>,
) -> Result<BatchSummary> {
    run_batch(config, table, error_log, false).await
}
