// ABOUTME: Append-only log of failed sync statements
// ABOUTME: Warns once per batch when the first failure is recorded

use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::utils::timestamp;

#[derive(Default)]
struct State {
    warned: bool,
    count: u64,
}

/// Failed writes are appended here instead of aborting the sync.
pub struct SyncErrorLog {
    path: PathBuf,
    tz: Tz,
    state: Mutex<State>,
}

impl SyncErrorLog {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            path: path.into(),
            tz,
            state: Mutex::new(State::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the failed statement and its error.
    ///
    /// The first failure since [`SyncErrorLog::clear`] also emits the warning banner.
    pub fn record(&self, table: &str, sql: &str, error: &anyhow::Error) {
        let first = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.count += 1;
            let first = !state.warned;
            state.warned = true;
            first
        };
        if first {
            self.banner();
        }

        let entry = format!(
            "{} {} ERROR {:#}\n{}\n\n",
            timestamp(self.tz),
            table,
            error,
            sql
        );
        if let Err(e) = self.append(&entry) {
            tracing::error!("(sync) could not write {}: {:#}", self.path.display(), e);
            tracing::error!("{}", entry);
        }
    }

    fn append(&self, entry: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(entry.as_bytes())?;
        Ok(())
    }

    fn banner(&self) {
        tracing::warn!("WARNING! Sync errors found check log in {}", self.path.display());
    }

    /// Failures recorded since the last clear.
    pub fn count(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).count
    }

    /// Reset the counter and banner at the start of a batch.
    pub fn clear(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = State::default();
    }

    /// Repeat the banner at the end of a batch if anything failed.
    pub fn warn_if_errors(&self) {
        if self.count() > 0 {
            self.banner();
        }
    }
}
