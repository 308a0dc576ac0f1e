// ABOUTME: Stream mode orchestration - binlog reader, translator, keepalive and nightly sync
// ABOUTME: Runs until a task fails; keepalive exhaustion is fatal

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::binlog::{server_id, BinlogReader};
use super::ChangeTranslator;
use crate::config::AppConfig;
use crate::db::Connector;
use crate::schema::Database;
use crate::sync::SyncEngine;

/// Pending change events between the binlog reader and the translator.
const EVENT_QUEUE: usize = 1024;

/// Options of one stream run.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub table_pattern: String,
    /// Run an initial and then a nightly full sync alongside the stream
    pub nightly_sync: bool,
}

/// Next occurrence of the local wall clock time `at` in `tz` strictly after `now`.
///
/// A time that does not exist on a DST switch day moves forward by an hour.
pub fn next_nightly_run(now: DateTime<Utc>, at: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let mut date = local_now.date_naive();
    loop {
        let naive = date.and_time(at);
        let candidate = tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + chrono::Duration::hours(1))).earliest());
        if let Some(candidate) = candidate {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > now {
                return candidate;
            }
        }
        match date.checked_add_days(Days::new(1)) {
            Some(next) => date = next,
            None => return now + chrono::Duration::days(1),
        }
    }
}

/// Verify both sessions every `every`; returns only on fatal failure.
pub async fn keepalive_loop(conns: Vec<Arc<dyn Connector>>, every: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        for conn in &conns {
            conn.keepalive().await?;
        }
    }
}

/// Full sync at start and then daily at the configured local time.
///
/// Uses its own connections so the batch never blocks the stream.
pub async fn nightly_loop(config: AppConfig, engine: SyncEngine, table_pattern: String) -> Result<()> {
    let tz = config.sync.tz()?;
    let at = config.sync.nightly_time()?;
    let source = Database::open(&config.source, &table_pattern).await?;
    let sink = Database::open(&config.sink, &table_pattern).await?;

    loop {
        tracing::info!("(stream-data) starting full sync");
        // Batch errors are logged, the stream keeps running
        match engine.sync_all(&source, &sink, &table_pattern, false).await {
            Ok(summary) => tracing::info!(
                "(stream-data) full sync done: {} tables, {} changes, {} failures",
                summary.tables_synced,
                summary.changes(),
                summary.failures
            ),
            Err(e) => tracing::error!("(stream-data) full sync failed: {:#}", e),
        }

        let next = next_nightly_run(Utc::now(), at, tz);
        tracing::info!(
            "(stream-data) next full sync at {}",
            next.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z")
        );
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
    }
}

async fn join(name: &str, handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(Ok(())) => bail!("(stream-data) {} stopped", name),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(e).with_context(|| format!("(stream-data) {} task panicked", name)),
    }
}

/// Mirror source changes to the sink until something fails.
pub async fn run(config: &AppConfig, engine: SyncEngine, options: StreamOptions) -> Result<()> {
    let dialect = config.source.dialect()?;
    if !dialect.is_mysql_family() {
        bail!(
            "(stream-data) change streaming needs a MySQL or MariaDB source, {} is {}",
            config.source.name,
            dialect
        );
    }

    let source = Arc::new(Database::open(&config.source, &options.table_pattern).await?);
    let sink = Arc::new(Database::open(&config.sink, &options.table_pattern).await?);

    let id = server_id(&config.source.name, &config.sink.name, config.sync.binlog_server_id);
    let reader = BinlogReader::start(&config.source, id).await?;

    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let translator = ChangeTranslator::new(source.clone(), sink.clone(), Arc::new(engine.clone()));
    let reader_task = tokio::spawn(reader.run(tx));
    let translator_task = tokio::spawn(translator.run(rx));

    let nightly_task = if options.nightly_sync {
        let nightly = nightly_loop(config.clone(), engine.clone(), options.table_pattern.clone());
        Some(tokio::spawn(nightly))
    } else {
        None
    };

    let keepalive = keepalive_loop(
        vec![source.connector().clone(), sink.connector().clone()],
        Duration::from_secs(config.sync.keepalive_secs.max(1)),
    );

    tokio::select! {
        result = keepalive => result.context("(stream-data) keepalive failed"),
        result = join("binlog reader", reader_task) => result,
        result = join("change translator", translator_task) => result,
        result = async {
            match nightly_task {
                Some(task) => join("nightly sync", task).await,
                None => std::future::pending().await,
            }
        } => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Dialect;
    use crate::testing::FakeConnector;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_next_run_later_today() {
        let at = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        // 02:00 in Stockholm (UTC+1 in winter)
        let next = next_nightly_run(utc(2025, 1, 15, 1, 0), at, chrono_tz::Europe::Stockholm);
        assert_eq!(next, utc(2025, 1, 15, 2, 0));
    }

    #[test]
    fn test_next_run_tomorrow_when_passed() {
        let at = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        let next = next_nightly_run(utc(2025, 1, 15, 2, 0), at, chrono_tz::Europe::Stockholm);
        assert_eq!(next, utc(2025, 1, 16, 2, 0));
    }

    #[test]
    fn test_next_run_skips_dst_gap() {
        // 2025-03-30 02:30 does not exist in Stockholm
        let at = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        let next = next_nightly_run(utc(2025, 3, 29, 23, 0), at, chrono_tz::Europe::Stockholm);
        assert_eq!(next, utc(2025, 3, 30, 1, 30));
    }

    #[tokio::test]
    async fn test_keepalive_gives_up_after_retries() {
        let conn = Arc::new(FakeConnector::new("src", Dialect::Mysql));
        // no canned response, so "select 1+2+3" never returns 6
        let conns: Vec<Arc<dyn Connector>> = vec![conn.clone()];
        let result = keepalive_loop(conns, Duration::from_millis(1)).await;
        assert!(result.is_err());
        assert_eq!(conn.reconnects(), crate::db::KEEPALIVE_RETRIES as usize);
    }
}
