// ABOUTME: MySQL/MariaDB binlog client feeding the change translator
// ABOUTME: Follows the binlog from the current position and resumes after connection loss

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use mysql_async::binlog::events::EventData;
use mysql_async::binlog::row::BinlogRow;
use mysql_async::binlog::value::BinlogValue;
use mysql_async::prelude::*;
use mysql_async::{BinlogStream, BinlogStreamRequest, Conn, Opts, Row};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{ChangeEvent, RowChange, RowImage};
use crate::config::DatabaseConfig;
use crate::db::mysql::{opts_from_config, value_to_text};
use crate::utils::retry_with_backoff;

const RECONNECT_RETRIES: u32 = 5;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A binlog file and offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinlogPosition {
    pub file: String,
    pub pos: u64,
}

/// Replica server id for this source/sink pair.
///
/// A configured non-zero id wins; otherwise the id is a stable hash of both
/// names so two mirrors of the same source do not collide.
pub fn server_id(source: &str, sink: &str, configured: u32) -> u32 {
    if configured != 0 {
        return configured;
    }
    let id = name_hash(source).wrapping_add(name_hash(sink)) as u32;
    id.max(1)
}

fn name_hash(name: &str) -> i32 {
    name.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
}

/// Current write position of the server.
pub async fn current_position(conn: &mut Conn) -> Result<BinlogPosition> {
    let rows = match conn.query::<Row, _>("SHOW MASTER STATUS").await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::debug!("(stream-data) SHOW MASTER STATUS failed ({}), trying SHOW BINARY LOG STATUS", e);
            conn.query::<Row, _>("SHOW BINARY LOG STATUS")
                .await
                .context("Failed to read the binlog position")?
        }
    };
    let Some(row) = rows.first() else {
        bail!("Binary logging is not enabled on the source server");
    };
    let file: Option<String> = row.get_opt(0).and_then(|v| v.ok());
    let pos: Option<u64> = row.get_opt(1).and_then(|v| v.ok());
    match (file, pos) {
        (Some(file), Some(pos)) if !file.is_empty() => Ok(BinlogPosition { file, pos }),
        _ => bail!("Binary logging is not enabled on the source server"),
    }
}

async fn open_stream(opts: Opts, server_id: u32, position: BinlogPosition) -> Result<BinlogStream> {
    let conn = Conn::new(opts).await.context("Failed to connect for binlog")?;
    let request = BinlogStreamRequest::new(server_id)
        .with_filename(position.file.as_bytes())
        .with_pos(position.pos);
    let stream = conn
        .get_binlog_stream(request)
        .await
        .with_context(|| format!("Failed to open binlog at {}:{}", position.file, position.pos))?;
    tracing::info!(
        "(stream-data) connected to binlog {}:{} as server id {}",
        position.file,
        position.pos,
        server_id
    );
    Ok(stream)
}

fn binlog_value_to_text(value: &BinlogValue<'_>) -> Option<String> {
    match value {
        BinlogValue::Value(v) => value_to_text(v),
        _ => None,
    }
}

fn row_image(row: &BinlogRow) -> RowImage {
    (0..row.len())
        .map(|i| row.as_ref(i).and_then(binlog_value_to_text))
        .collect()
}

/// Follows the source binlog and sends decoded events downstream.
pub struct BinlogReader {
    name: String,
    opts: Opts,
    server_id: u32,
    position: BinlogPosition,
}

impl BinlogReader {
    /// Connect once to read the current position.
    pub async fn start(config: &DatabaseConfig, server_id: u32) -> Result<Self> {
        let opts = opts_from_config(config)?;
        let mut conn = Conn::new(opts.clone())
            .await
            .with_context(|| format!("Failed to connect to {}", config.display_url()))?;
        let position = current_position(&mut conn).await?;
        conn.disconnect().await?;

        tracing::info!(
            "(stream-data) {} binlog starts at {}:{}",
            config.name,
            position.file,
            position.pos
        );
        Ok(Self {
            name: config.name.clone(),
            opts,
            server_id,
            position,
        })
    }

    pub fn position(&self) -> &BinlogPosition {
        &self.position
    }

    /// Stream until the receiver goes away.
    ///
    /// A broken stream is reopened at the last seen position; when that keeps
    /// failing the error is returned.
    pub async fn run(mut self, tx: mpsc::Sender<ChangeEvent>) -> Result<()> {
        loop {
            let opts = self.opts.clone();
            let server_id = self.server_id;
            let position = self.position.clone();
            let mut stream = retry_with_backoff(
                move || open_stream(opts.clone(), server_id, position.clone()),
                RECONNECT_RETRIES,
                RECONNECT_DELAY,
            )
            .await
            .with_context(|| format!("(stream-data) binlog of {} unavailable", self.name))?;

            match self.follow(&mut stream, &tx).await {
                Ok(true) => {
                    tracing::info!("(stream-data) change consumer stopped, closing binlog");
                    return Ok(());
                }
                Ok(false) => {
                    tracing::error!("(stream-data) disconnected from binlog of {}", self.name);
                }
                Err(e) => {
                    tracing::error!("(stream-data) binlog communication failure: {:#}", e);
                }
            }
        }
    }

    /// Forward events, returning `Ok(true)` when the receiver is gone and
    /// `Ok(false)` when the server closed the stream.
    async fn follow(&mut self, stream: &mut BinlogStream, tx: &mpsc::Sender<ChangeEvent>) -> Result<bool> {
        while let Some(event) = stream.next().await {
            let event = event.context("Failed to read binlog event")?;
            let log_pos = event.header().log_pos();

            let change = match event.read_data().context("Failed to decode binlog event")? {
                Some(EventData::RotateEvent(rotate)) => {
                    self.position = BinlogPosition {
                        file: rotate.name().into_owned(),
                        pos: rotate.position(),
                    };
                    tracing::debug!("(stream-data) rotate to {}:{}", self.position.file, self.position.pos);
                    continue;
                }
                Some(EventData::TableMapEvent(tme)) => Some(ChangeEvent::TableMap {
                    table_id: tme.table_id(),
                    database: tme.database_name().into_owned(),
                    table: tme.table_name().into_owned(),
                }),
                Some(EventData::RowsEvent(rows_event)) => {
                    let table_id = rows_event.table_id();
                    match stream.get_tme(table_id) {
                        Some(tme) => {
                            let mut rows = Vec::new();
                            for row in rows_event.rows(tme) {
                                let (before, after) = row.context("Failed to decode row image")?;
                                rows.push(RowChange {
                                    before: before.as_ref().map(row_image),
                                    after: after.as_ref().map(row_image),
                                });
                            }
                            Some(ChangeEvent::Rows { table_id, rows })
                        }
                        None => {
                            tracing::debug!("(stream-data) rows event for unmapped table id {}", table_id);
                            None
                        }
                    }
                }
                _ => None,
            };

            if log_pos > 0 {
                self.position.pos = u64::from(log_pos);
            }
            if let Some(change) = change {
                if tx.send(change).await.is_err() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
