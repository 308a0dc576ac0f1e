// ABOUTME: Change stream - turns binlog row events into single-key sync ranges
// ABOUTME: The translator resolves tables and keys, the sync itself goes through RangeSync

pub mod binlog;
pub mod runner;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::schema::{Database, Table};
use crate::sync::KeyRange;

/// Column values of one binlog row image, as text.
pub type RowImage = Vec<Option<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row event's before/after images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    pub before: Option<RowImage>,
    pub after: Option<RowImage>,
}

impl RowChange {
    pub fn kind(&self) -> ChangeKind {
        match (&self.before, &self.after) {
            (Some(_), Some(_)) => ChangeKind::Update,
            (Some(_), None) => ChangeKind::Delete,
            _ => ChangeKind::Insert,
        }
    }
}

/// Decoded binlog events the translator cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    TableMap {
        table_id: u64,
        database: String,
        table: String,
    },
    Rows {
        table_id: u64,
        rows: Vec<RowChange>,
    },
}

/// Something that can bring one key range of a table pair into sync.
#[async_trait]
pub trait RangeSync: Send + Sync {
    async fn sync_range(&self, source: &Table, sink: &Table, range: &KeyRange) -> Result<()>;
}

/// Maps row events onto `KeyRange{k, k, [k]}` syncs.
pub struct ChangeTranslator {
    source: Arc<Database>,
    sink: Arc<Database>,
    syncer: Arc<dyn RangeSync>,
    source_database: Option<String>,
    table_map: HashMap<u64, (String, String)>,
}

impl ChangeTranslator {
    pub fn new(source: Arc<Database>, sink: Arc<Database>, syncer: Arc<dyn RangeSync>) -> Self {
        let source_database = source.config.database_name();
        Self {
            source,
            sink,
            syncer,
            source_database,
            table_map: HashMap::new(),
        }
    }

    /// Handle one event, returning how many ranges were synced.
    pub async fn handle(&mut self, event: ChangeEvent) -> usize {
        match event {
            ChangeEvent::TableMap {
                table_id,
                database,
                table,
            } => {
                self.table_map.insert(table_id, (database, table));
                0
            }
            ChangeEvent::Rows { table_id, rows } => {
                let Some((source_table, sink_table)) = self.resolve(table_id) else {
                    return 0;
                };
                let mut synced = 0;
                for change in &rows {
                    for key in change_keys(&source_table, change) {
                        let range = KeyRange::single(key);
                        match self.syncer.sync_range(&source_table, &sink_table, &range).await {
                            Ok(()) => synced += 1,
                            Err(e) => tracing::error!(
                                "(stream-data) sync of {} pk {} failed: {:#}",
                                source_table.name,
                                key,
                                e
                            ),
                        }
                    }
                }
                synced
            }
        }
    }

    /// Look up the table pair for a row event, logging why it is dropped.
    fn resolve(&self, table_id: u64) -> Option<(Arc<Table>, Arc<Table>)> {
        let Some((database, table)) = self.table_map.get(&table_id) else {
            tracing::debug!("(stream-data) no table map for table id {}", table_id);
            return None;
        };
        if let Some(expected) = &self.source_database {
            if database != expected {
                tracing::debug!("(stream-data) ignoring event from {}", database);
                return None;
            }
        }
        let Some(source_table) = self.source.table(table) else {
            if self.source.is_ignored(table) || self.sink.is_ignored(table) {
                tracing::debug!("(stream-data) ignoring event for ignored table {}", table);
            } else {
                tracing::warn!("(stream-data) unknown source table: {}", table);
            }
            return None;
        };
        let Some(sink_table) = self.sink.table(table) else {
            tracing::warn!("(stream-data) could not find sink table: {} Please create!", table);
            return None;
        };
        Some((source_table, sink_table))
    }

    /// Consume events until the channel closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ChangeEvent>) -> Result<()> {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        tracing::info!("(stream-data) change stream closed");
        Ok(())
    }
}

/// Keys to sync for one row change.
///
/// Inserts and deletes use their only image, updates the before image plus
/// the after image when the key itself changed. Composite keys are keyed on
/// their leading column; the fetch then covers every row sharing it.
pub fn change_keys(table: &Table, change: &RowChange) -> Vec<i64> {
    let Some(index) = table.primary_key_index() else {
        return Vec::new();
    };

    let mut keys = Vec::with_capacity(2);
    for image in [&change.before, &change.after].into_iter().flatten() {
        match image_key(image, index) {
            Ok(key) => {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            Err(raw) => tracing::warn!(
                "(stream-data) table {} key {:?} is not an integer, change dropped",
                table.name,
                raw
            ),
        }
    }
    keys
}

fn image_key(image: &RowImage, index: usize) -> Result<i64, Option<String>> {
    let raw = image.get(index).cloned().flatten();
    raw.as_deref()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or(raw)
}
