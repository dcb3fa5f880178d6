//! Shared state for one harvest run.
//!
//! A [`RunContext`] is created per run and handed to every worker by
//! reference. It carries the only state shared across concurrent units:
//! - the cancellation flag (monotonic, false → true exactly once)
//! - succeeded / failed / skipped tallies
//! - the registry of staging directories owned by in-flight clones

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Result of trying to promote a staging directory to its final path.
#[derive(Debug)]
pub enum Commit {
    /// The staging directory now lives at the final path.
    Committed,
    /// Cancellation won; the caller must discard the staging directory.
    Cancelled,
}

#[derive(Debug, Default)]
pub struct RunContext {
    cancelled: AtomicBool,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    in_flight: Mutex<HashSet<PathBuf>>,
    wake: Notify,
}

/// Snapshot of the run tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Tally {
    /// Counts accumulated after `earlier` was taken.
    pub fn since(&self, earlier: Tally) -> Tally {
        Tally {
            succeeded: self.succeeded.saturating_sub(earlier.succeeded),
            failed: self.failed.saturating_sub(earlier.failed),
            skipped: self.skipped.saturating_sub(earlier.skipped),
        }
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the run is cancelled; immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the check so a concurrent `cancel` cannot be missed.
            let notified = self.wake.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Sets the flag and deletes every registered staging directory.
    ///
    /// Returns `false` if the run had already been cancelled; only the first
    /// caller performs the cleanup.
    pub fn cancel(&self) -> bool {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.wake.notify_waiters();

        let staged: Vec<PathBuf> = self.registry().drain().collect();
        for path in staged {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed in-flight staging directory"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove staging directory")
            }
            }
        }
        true
    }

    /// Registers a staging directory as owned by an in-flight unit.
    ///
    /// Refuses (returns `false`) once the run is cancelled, so nothing is
    /// registered after cleanup has drained the registry.
    pub fn register(&self, staging: &Path) -> bool {
        let mut registry = self.registry();
        if self.is_cancelled() {
            return false;
        }
        registry.insert(staging.to_path_buf());
        true
    }

    pub fn release(&self, staging: &Path) {
        self.registry().remove(staging);
    }

    /// Renames `staging` to `target` unless the run was cancelled first.
    ///
    /// The flag check and the rename happen under the registry lock that
    /// [`RunContext::cancel`] also takes, so a commit and the cancellation
    /// cleanup are totally ordered.
    pub fn commit(&self, staging: &Path, target: &Path) -> io::Result<Commit> {
        let mut registry = self.registry();
        if self.is_cancelled() {
            return Ok(Commit::Cancelled);
        }
        std::fs::rename(staging, target)?;
        registry.remove(staging);
        Ok(Commit::Committed)
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn tally(&self) -> Tally {
        Tally {
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        // A panicking holder cannot leave the set half-updated.
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
