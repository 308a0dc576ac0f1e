// ABOUTME: Sync engine - applies merge-diff plans chunk by chunk to the sink
// ABOUTME: Drives bulk sync per table and per batch, recording failures without aborting

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::chunk::{chunk_primary_keys, KeyRange};
use super::diff::{build_delete_sql, build_insert_sql, build_update_sql, merge_diff, ChunkPlan};
use super::fetch::fetch;
use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::error_log::SyncErrorLog;
use crate::progress::ProgressHandle;
use crate::schema::{Database, Table};
use crate::stream::RangeSync;

/// Whether a chunk comes from the bulk chunker or from a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Bulk,
    Streaming,
}

impl SyncMode {
    fn tag(self) -> &'static str {
        match self {
            SyncMode::Bulk => "(sync-data)",
            SyncMode::Streaming => "(stream-data)",
        }
    }
}

/// Counts for one synced chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub rows: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub failures: u64,
    pub skipped: bool,
}

impl ChunkOutcome {
    pub fn changes(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }
}

/// Totals of a batch run over several tables.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub tables_synced: usize,
    pub tables_skipped: usize,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub failures: u64,
}

impl BatchSummary {
    pub fn changes(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }

    fn add(&mut self, outcome: &ChunkOutcome) {
        self.inserts += outcome.inserts;
        self.updates += outcome.updates;
        self.deletes += outcome.deletes;
        self.failures += outcome.failures;
    }
}

/// Turns key ranges into converging writes on the sink.
#[derive(Clone)]
pub struct SyncEngine {
    progress: ProgressHandle,
    error_log: Arc<SyncErrorLog>,
    chunk_size: usize,
}

impl SyncEngine {
    pub fn new(settings: &SyncSettings, progress: ProgressHandle, error_log: Arc<SyncErrorLog>) -> Self {
        Self {
            progress,
            error_log,
            chunk_size: settings.chunk_size,
        }
    }

    pub fn progress(&self) -> &ProgressHandle {
        &self.progress
    }

    pub fn error_log(&self) -> &Arc<SyncErrorLog> {
        &self.error_log
    }

    /// Make the sink rows of `range` equal to the source rows.
    ///
    /// Both sides are fetched with the source columns as reference, merged,
    /// and the resulting inserts, updates and deletes are executed in that
    /// order (or printed with `dry_run`). A column mismatch skips the chunk
    /// with a warning. A failed read or write is recorded in the error log
    /// and the sync carries on; only unsupported column types are fatal.
    pub async fn sync_chunk(
        &self,
        source: &Table,
        sink: &Table,
        range: &KeyRange,
        mode: SyncMode,
        dry_run: bool,
    ) -> Result<ChunkOutcome> {
        let target = sink.dialect();
        let plan = match self.plan_chunk(source, sink, range, target).await {
            Ok(plan) => plan,
            Err(e) => match e.downcast_ref::<SyncError>() {
                Some(sync_error) if sync_error.is_skippable() => {
                    tracing::warn!("{} {}, skipping chunk [{}..{}]", mode.tag(), sync_error, range.from, range.to);
                    return Ok(ChunkOutcome {
                        skipped: true,
                        ..ChunkOutcome::default()
                    });
                }
                Some(SyncError::UnsupportedType { .. }) => return Err(e),
                _ => {
                    tracing::warn!(
                        "{} reading chunk [{}..{}] of {} failed: {:#}",
                        mode.tag(),
                        range.from,
                        range.to,
                        source.name,
                        e
                    );
                    let what = format!("-- fetch {} [{}..{}]", source.name, range.from, range.to);
                    self.error_log.record(&sink.name, &what, &e);
                    self.progress.failure(&sink.name);
                    return Ok(ChunkOutcome {
                        failures: 1,
                        skipped: true,
                        ..ChunkOutcome::default()
                    });
                }
            },
        };
        let (source_rows, plan) = plan;

        let column_names: Vec<String> = source.column_names().map(str::to_string).collect();
        let mut outcome = ChunkOutcome {
            rows: source_rows,
            inserts: plan.inserts.len() as u64,
            updates: plan.updates.len() as u64,
            deletes: plan.deletes.len() as u64,
            ..ChunkOutcome::default()
        };

        if !plan.inserts.is_empty() {
            let sql = build_insert_sql(sink, &column_names, &plan.inserts);
            if mode == SyncMode::Streaming {
                tracing::info!("{} {}", mode.tag(), sql);
            }
            outcome.failures += self.apply(sink, &sql, dry_run).await;
        }

        if !plan.updates.is_empty() {
            let statements: Vec<String> = plan
                .updates
                .iter()
                .map(|update| build_update_sql(sink, &column_names, update))
                .collect();
            for statement in &statements {
                tracing::info!("{} {}", mode.tag(), statement);
            }
            outcome.failures += self.apply(sink, &statements.join(";"), dry_run).await;
        }

        if !plan.deletes.is_empty() {
            let sql = build_delete_sql(sink, &plan.deletes);
            tracing::info!("{} {}", mode.tag(), sql);
            outcome.failures += self.apply(sink, &sql, dry_run).await;
        }

        self.progress.counts(
            &sink.name,
            outcome.rows,
            outcome.inserts,
            outcome.updates,
            outcome.deletes,
            range.from,
        );
        Ok(outcome)
    }

    async fn plan_chunk(
        &self,
        source: &Table,
        sink: &Table,
        range: &KeyRange,
        target: crate::db::Dialect,
    ) -> Result<(u64, ChunkPlan)> {
        let source_rows = fetch(source, range, &source.columns, target).await?;
        // Source columns are the reference on both sides
        let sink_rows = fetch(sink, range, &source.columns, target).await?;
        let plan = merge_diff(&sink.name, &source_rows, &sink_rows)?;
        Ok((source_rows.len() as u64, plan))
    }

    /// Execute (or print) one statement batch, returning 1 on failure.
    async fn apply(&self, sink: &Table, sql: &str, dry_run: bool) -> u64 {
        if dry_run {
            println!("{};", sql);
            return 0;
        }
        match sink.connector().execute(sql).await {
            Ok(_) => 0,
            Err(e) => {
                tracing::debug!("(sync) write to {} failed: {:#}", sink.name, e);
                self.error_log.record(&sink.name, sql, &e);
                self.progress.failure(&sink.name);
                1
            }
        }
    }

    /// Bulk sync one table, newest key ranges first.
    ///
    /// A table missing on the source is fatal, one missing on the sink is
    /// skipped with a warning (`Ok(None)`).
    pub async fn sync_data(
        &self,
        source: &Database,
        sink: &Database,
        table: &str,
        label: &str,
        dry_run: bool,
    ) -> Result<Option<BatchSummary>> {
        let Some(source_table) = source.table(table) else {
            bail!("(sync-data) table {} does not exist in source {}", table, source.name());
        };
        let Some(sink_table) = sink.table(table) else {
            tracing::warn!("(sync-data) table {} does not exist in sink! Please create!", table);
            return Ok(None);
        };

        let total_rows = source_table.exact_row_count().await?.max(0) as u64;
        self.progress.table_started(
            &sink_table.name,
            label,
            total_rows,
            source.max_table_name_length(),
        );

        let result = self.sync_ranges(&source_table, &sink_table, dry_run).await;
        self.progress.table_finished(&sink_table.name);
        result.map(Some)
    }

    async fn sync_ranges(&self, source: &Table, sink: &Table, dry_run: bool) -> Result<BatchSummary> {
        let mut ranges = chunk_primary_keys(source, self.chunk_size).await?;
        // Highest keys are the most recently written rows
        ranges.reverse();

        let mut summary = BatchSummary {
            tables_synced: 1,
            ..BatchSummary::default()
        };
        for range in &ranges {
            let outcome = self
                .sync_chunk(source, sink, range, SyncMode::Bulk, dry_run)
                .await?;
            summary.add(&outcome);
        }
        Ok(summary)
    }

    /// Sync one table or, with an empty pattern, every source table.
    ///
    /// Tables are processed smallest first and those without a single
    /// integer primary key are skipped with a warning.
    pub async fn sync_all(
        &self,
        source: &Database,
        sink: &Database,
        table_pattern: &str,
        dry_run: bool,
    ) -> Result<BatchSummary> {
        self.error_log.clear();
        self.progress.batch_started();

        let pattern = table_pattern.trim();
        let tables = if pattern.is_empty() {
            let mut tables = source.tables().to_vec();
            tables.sort_by_key(|t| t.approx_disk_kb);
            tables
        } else {
            match source.table(pattern) {
                Some(table) => vec![table],
                None => bail!("(sync-data) table {} does not exist in source {}", pattern, source.name()),
            }
        };

        let mut summary = BatchSummary::default();
        let total = tables.len();
        for (i, table) in tables.iter().enumerate() {
            if !table.has_integer_primary_key() {
                tracing::warn!(
                    "(sync-data) skipping table {} since its primary key is not a single integer column",
                    table.name
                );
                summary.tables_skipped += 1;
                continue;
            }
            let label = if pattern.is_empty() {
                batch_label(i + 1, total)
            } else {
                String::new()
            };
            match self.sync_data(source, sink, &table.name, &label, dry_run).await? {
                Some(table_summary) => {
                    summary.tables_synced += 1;
                    summary.inserts += table_summary.inserts;
                    summary.updates += table_summary.updates;
                    summary.deletes += table_summary.deletes;
                    summary.failures += table_summary.failures;
                }
                None => summary.tables_skipped += 1,
            }
        }

        self.progress.batch_done();
        self.error_log.warn_if_errors();
        Ok(summary)
    }
}

/// `NN/NN ` (three digits from 100 tables on).
pub fn batch_label(index: usize, total: usize) -> String {
    if total >= 100 {
        format!("{:03}/{:03} ", index, total)
    } else {
        format!("{:02}/{:02} ", index, total)
    }
}

#[async_trait]
impl RangeSync for SyncEngine {
    async fn sync_range(&self, source: &Table, sink: &Table, range: &KeyRange) -> Result<()> {
        self.sync_chunk(source, sink, range, SyncMode::Streaming, false)
            .await
            .map(|_| ())
    }
}
