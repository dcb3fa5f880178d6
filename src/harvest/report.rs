//! Per-repository outcome log and per-ecosystem run summary.

use crate::context::Tally;
use crate::model::{CloneOutcome, Ecosystem, RetrievalMode};
use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Append-only JSON-lines record of every [`CloneOutcome`].
#[derive(Debug)]
pub struct OutcomeLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl OutcomeLog {
    /// Opens `path` for appending, creating it and its parent if missing.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line. Write failures are logged, never propagated.
    pub fn record(&self, outcome: &CloneOutcome) {
        let line = match serde_json::to_string(outcome) {
            Ok(line) => line,
            Err(e) => {
                warn!(url = %outcome.source_url, error = %e, "Cannot encode outcome");
                return;
            }
        };
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{}", line) {
            warn!(path = %self.path.display(), error = %e, "Cannot append to outcome log");
        }
    }
}

/// Counts for one ecosystem's pass through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ecosystem: Ecosystem,
    pub mode: RetrievalMode,
    /// Candidate URLs handed to discovery.
    pub candidates: usize,
    /// Repositories with at least one matching file.
    pub accepted: usize,
    /// Matching files found across accepted repositories.
    pub matched_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn new(ecosystem: Ecosystem, mode: RetrievalMode) -> Self {
        Self {
            ecosystem,
            mode,
            candidates: 0,
            accepted: 0,
            matched_files: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            cancelled: false,
            elapsed_ms: 0,
        }
    }

    pub fn apply(&mut self, tally: Tally) {
        self.succeeded = tally.succeeded;
        self.failed = tally.failed;
        self.skipped = tally.skipped;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {} succeeded, {} failed, {} skipped",
            self.ecosystem, self.mode, self.succeeded, self.failed, self.skipped
        )?;
        write!(
            f,
            " [{} of {} repositories matched, {} files]",
            self.accepted, self.candidates, self.matched_files
        )?;
        if self.cancelled {
            f.write_str(" (interrupted)")?;
        }
        Ok(())
    }
}
