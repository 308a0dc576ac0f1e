// ABOUTME: Progress tracker - one task owns all sync counters and the status line
// ABOUTME: Writers send events over a channel, readers ask for snapshots

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::utils::{right_pad, seconds_to_hr};

/// How often the status line is redrawn.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Speed and remaining time are hidden before this much time has passed.
const SPEED_AFTER: Duration = Duration::from_secs(10);

/// Events sent to the progress owner task.
#[derive(Debug)]
pub enum ProgressEvent {
    /// A full batch starts, counters are reset
    BatchStarted,
    BatchDone,
    TableStarted {
        table: String,
        label: String,
        total_rows: u64,
        name_width: usize,
    },
    /// One synced chunk (or change event) worth of counts
    Counts {
        table: String,
        rows: u64,
        inserts: u64,
        updates: u64,
        deletes: u64,
        last_pk: i64,
    },
    Failure {
        table: String,
    },
    TableFinished {
        table: String,
    },
    Snapshot(oneshot::Sender<ProgressSnapshot>),
}

/// Per table counters, never decremented within a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCounters {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub failures: u64,
    pub last_change: Option<DateTime<Utc>>,
}

impl SyncCounters {
    pub fn changes(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }
}

/// Status of the table currently being bulk synced.
#[derive(Debug, Clone)]
pub struct TableStatus {
    pub table: String,
    pub label: String,
    pub name_width: usize,
    pub total_rows: u64,
    pub processed: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub failures: u64,
    pub last_pk: i64,
    pub started: Instant,
}

impl TableStatus {
    fn new(table: String, label: String, total_rows: u64, name_width: usize) -> Self {
        Self {
            table,
            label,
            name_width,
            total_rows,
            processed: 0,
            inserts: 0,
            updates: 0,
            deletes: 0,
            failures: 0,
            last_pk: 0,
            started: Instant::now(),
        }
    }

    pub fn percent(&self) -> u64 {
        if self.total_rows == 0 {
            100
        } else {
            self.processed * 100 / self.total_rows
        }
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total_rows
    }

    /// Render the status line as it looks after `elapsed`.
    ///
    /// `label+table: P% (processed/total pk"last") R rows/s (Ni Nu Nd) | elapsed/remaining`
    pub fn render(&self, elapsed: Duration) -> String {
        let mut out = format!(
            "{}{}: {}% ({}/{}",
            self.label,
            right_pad(&self.table, self.name_width),
            self.percent(),
            self.processed,
            self.total_rows
        );
        if !self.is_complete() {
            out.push_str(&format!(" pk\"{}\"", self.last_pk));
        }
        out.push(')');

        let secs = elapsed.as_secs();
        let show_speed = elapsed >= SPEED_AFTER;
        let rate = if secs > 0 {
            self.processed as f64 / secs as f64
        } else {
            0.0
        };
        if show_speed {
            out.push_str(&format!(" {} rows/s", rate as u64));
        }

        let mut info = Vec::new();
        if self.inserts > 0 {
            info.push(format!("{}i", self.inserts));
        }
        if self.updates > 0 {
            info.push(format!("{}u", self.updates));
        }
        if self.deletes > 0 {
            info.push(format!("{}d", self.deletes));
        }
        if self.failures > 0 {
            info.push("!errors!".to_string());
        }
        if !info.is_empty() {
            out.push_str(&format!(" ({})", info.join(" ")));
        } else if self.is_complete() {
            out.push_str(" (no changes)");
        }

        out.push_str(" | ");
        out.push_str(&seconds_to_hr(secs));
        if show_speed && !self.is_complete() && rate > 0.0 {
            let remaining = (self.total_rows - self.processed) as f64 / rate;
            out.push('/');
            out.push_str(&seconds_to_hr(remaining as u64));
        }
        out
    }
}

/// Point-in-time copy of the tracker state.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub tables: BTreeMap<String, SyncCounters>,
    pub current: Option<String>,
    pub current_line: Option<String>,
    pub last_batch_done: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    pub fn total_changes(&self) -> u64 {
        self.tables.values().map(SyncCounters::changes).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.tables.values().map(|c| c.failures).sum()
    }
}

/// State owned by the tracker task.
#[derive(Default)]
struct Tracker {
    tables: BTreeMap<String, SyncCounters>,
    current: Option<TableStatus>,
    last_batch_done: Option<DateTime<Utc>>,
}

impl Tracker {
    /// Apply one event, returning a finished table's final status line.
    fn apply(&mut self, event: ProgressEvent) -> Option<String> {
        match event {
            ProgressEvent::BatchStarted => {
                self.tables.clear();
            }
            ProgressEvent::BatchDone => {
                self.last_batch_done = Some(Utc::now());
            }
            ProgressEvent::TableStarted {
                table,
                label,
                total_rows,
                name_width,
            } => {
                self.tables.entry(table.clone()).or_default();
                self.current = Some(TableStatus::new(table, label, total_rows, name_width));
            }
            ProgressEvent::Counts {
                table,
                rows,
                inserts,
                updates,
                deletes,
                last_pk,
            } => {
                let counters = self.tables.entry(table.clone()).or_default();
                counters.inserts += inserts;
                counters.updates += updates;
                counters.deletes += deletes;
                if inserts + updates + deletes > 0 {
                    counters.last_change = Some(Utc::now());
                }
                if let Some(status) = self.current.as_mut().filter(|s| s.table == table) {
                    status.processed += rows;
                    status.inserts += inserts;
                    status.updates += updates;
                    status.deletes += deletes;
                    status.last_pk = last_pk;
                }
            }
            ProgressEvent::Failure { table } => {
                self.tables.entry(table.clone()).or_default().failures += 1;
                if let Some(status) = self.current.as_mut().filter(|s| s.table == table) {
                    status.failures += 1;
                }
            }
            ProgressEvent::TableFinished { table } => {
                if self.current.as_ref().map(|s| s.table == table).unwrap_or(false) {
                    let status = self.current.take()?;
                    return Some(status.render(status.started.elapsed()));
                }
            }
            ProgressEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
        None
    }

    fn status_line(&self) -> Option<String> {
        self.current.as_ref().map(|s| s.render(s.started.elapsed()))
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            tables: self.tables.clone(),
            current: self.current.as_ref().map(|s| s.table.clone()),
            current_line: self.status_line(),
            last_batch_done: self.last_batch_done,
        }
    }
}

/// Cheap, cloneable sender side of the tracker.
#[derive(Clone)]
pub struct ProgressHandle {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressHandle {
    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("(progress) tracker stopped, event dropped");
        }
    }

    pub fn batch_started(&self) {
        self.send(ProgressEvent::BatchStarted);
    }

    pub fn batch_done(&self) {
        self.send(ProgressEvent::BatchDone);
    }

    pub fn table_started(&self, table: &str, label: &str, total_rows: u64, name_width: usize) {
        self.send(ProgressEvent::TableStarted {
            table: table.to_string(),
            label: label.to_string(),
            total_rows,
            name_width,
        });
    }

    pub fn counts(&self, table: &str, rows: u64, inserts: u64, updates: u64, deletes: u64, last_pk: i64) {
        self.send(ProgressEvent::Counts {
            table: table.to_string(),
            rows,
            inserts,
            updates,
            deletes,
            last_pk,
        });
    }

    pub fn failure(&self, table: &str) {
        self.send(ProgressEvent::Failure {
            table: table.to_string(),
        });
    }

    pub fn table_finished(&self, table: &str) {
        self.send(ProgressEvent::TableFinished {
            table: table.to_string(),
        });
    }

    /// Ask the tracker for a copy of its state.
    pub async fn snapshot(&self) -> Result<ProgressSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(ProgressEvent::Snapshot(tx))
            .map_err(|_| anyhow!("progress tracker has stopped"))?;
        rx.await.map_err(|_| anyhow!("progress tracker has stopped"))
    }
}

fn status_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar
}

/// Spawn the tracker task.
///
/// With `status_line` the current table is redrawn every second on stderr
/// and finished tables leave one final line; otherwise final lines go to the log.
/// The task ends once every handle has been dropped.
pub fn spawn(status_line: bool) -> (ProgressHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let mut tracker = Tracker::default();
        let mut bar: Option<ProgressBar> = None;
        let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let started = matches!(event, ProgressEvent::TableStarted { .. });
                    if let Some(final_line) = tracker.apply(event) {
                        if let Some(bar) = bar.take() {
                            bar.finish_and_clear();
                        }
                        if status_line {
                            eprintln!("{}", final_line);
                        } else {
                            tracing::info!("{}", final_line);
                        }
                    }
                    if started && status_line {
                        let new_bar = status_bar();
                        if let Some(line) = tracker.status_line() {
                            new_bar.set_message(line);
                        }
                        if let Some(old) = bar.replace(new_bar) {
                            old.finish_and_clear();
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let (Some(bar), Some(line)) = (bar.as_ref(), tracker.status_line()) {
                        bar.set_message(line);
                    }
                }
            }
        }

        if let Some(bar) = bar.take() {
            bar.finish_and_clear();
        }
    });
    (ProgressHandle { tx }, task)
}
