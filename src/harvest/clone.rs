//! Clone-mode retrieval.
//!
//! [`RepositoryCloner`] drives one repository through
//! `PENDING → CLONING → BRANCH_NORMALIZE → SUBMODULE_SYNC → SUCCEEDED`,
//! retrying tool failures per its [`RetryStrategy`]:
//! - Malformed URLs and pre-existing targets end immediately, without I/O
//! - The cancellation flag is checked before every attempt
//! - Each attempt works in a staging directory that is renamed onto the
//!   final path only on success, and deleted on every other path
//! - Unexpected failures (worker panics, filesystem errors outside the
//!   tool) are terminal and never retried

use crate::context::{Commit, RunContext};
use crate::harvest::traits::{CloneError, CloneTool, RetryStrategy};
use crate::model::{CloneOutcome, OutcomeKind, RepositoryReference};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Checked out after cloning, in priority order.
pub const BRANCH_CANDIDATES: [&str; 2] = ["main", "master"];

// ============================================================================
// Staging Directory
// ============================================================================

/// A clone's working directory before it is committed.
///
/// Registered with the [`RunContext`] while alive so that cancellation can
/// remove it. Implements [`Drop`] to delete the directory on every exit path
/// that did not commit it, including panics and early returns.
#[derive(Debug)]
struct StagingDir {
    path: PathBuf,
    ctx: Arc<RunContext>,
    committed: bool,
}

impl StagingDir {
    /// `None` if the run is already cancelled.
    fn claim(ctx: &Arc<RunContext>, path: PathBuf) -> Option<Self> {
        if !ctx.register(&path) {
            return None;
        }
        Some(Self {
            path,
            ctx: Arc::clone(ctx),
            committed: false,
        })
    }

    fn commit(mut self, target: &Path) -> io::Result<Commit> {
        let result = self.ctx.commit(&self.path, target);
        if matches!(result, Ok(Commit::Committed)) {
            self.committed = true;
        }
        result
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove partial clone");
            }
        }
        self.ctx.release(&self.path);
    }
}

// ============================================================================
// Cloner
// ============================================================================

enum AttemptError {
    /// Tool-level failure; eligible for retry.
    Transient(CloneError),
    /// Anything else; terminal.
    Unexpected(String),
}

enum Attempt {
    Committed,
    Cancelled,
}

pub struct RepositoryCloner<C: CloneTool + 'static> {
    tool: Arc<C>,
    retry: Arc<dyn RetryStrategy>,
    ctx: Arc<RunContext>,
    output_dir: PathBuf,
}

impl<C: CloneTool + 'static> RepositoryCloner<C> {
    pub fn new(
        tool: Arc<C>,
        retry: Arc<dyn RetryStrategy>,
        ctx: Arc<RunContext>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tool,
            retry,
            ctx,
            output_dir: output_dir.into(),
        }
    }

    /// Clones `raw_url` into `output_dir/owner/repo`.
    ///
    /// Never fails: every path ends in a [`CloneOutcome`], which is also
    /// counted in the run tallies and logged at a severity matching its kind.
    pub async fn clone_repository(&self, raw_url: &str) -> CloneOutcome {
        let started = Instant::now();
        let outcome = self.drive(raw_url).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome.kind {
            OutcomeKind::Cloned => {
                self.ctx.record_success();
                info!(url = raw_url, attempts = outcome.attempts_used, elapsed_ms, "Cloned");
            }
            OutcomeKind::AlreadyExists => {
                self.ctx.record_skip();
                warn!(url = raw_url, "Skipping clone, target already exists");
            }
            OutcomeKind::Malformed | OutcomeKind::Terminating => {
                self.ctx.record_failure();
                warn!(url = raw_url, message = %outcome.message, "Clone not attempted");
            }
            OutcomeKind::Exhausted | OutcomeKind::Unexpected => {
                self.ctx.record_failure();
                error!(
                    url = raw_url,
                    attempts = outcome.attempts_used,
                    message = %outcome.message,
                    "Clone failed"
                );
            }
        }
        outcome
    }

    async fn drive(&self, raw_url: &str) -> CloneOutcome {
        let reference = match RepositoryReference::parse(raw_url) {
            Ok(r) => r,
            Err(e) => {
                let message = e.to_string();
                return CloneOutcome::new(raw_url, None, OutcomeKind::Malformed, message, 0);
            }
        };
        let outcome = |kind: OutcomeKind, message: String, attempts: u32| {
            CloneOutcome::new(raw_url, Some(reference.clone()), kind, message, attempts)
        };

        let target = self.output_dir.join(reference.relative_dir());
        if target.exists() {
            return outcome(OutcomeKind::AlreadyExists, "already exists".into(), 0);
        }

        let owner_dir = self.output_dir.join(&reference.owner);
        let staging = owner_dir.join(format!(".{}.partial", reference.name));
        let max_attempts = self.retry.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if self.ctx.is_cancelled() {
                return outcome(OutcomeKind::Terminating, "terminating".into(), attempt - 1);
            }

            match self.attempt(&reference, &owner_dir, &staging, &target).await {
                Ok(Attempt::Committed) => {
                    return outcome(OutcomeKind::Cloned, "cloned".into(), attempt);
                }
                Ok(Attempt::Cancelled) => {
                    return outcome(OutcomeKind::Terminating, "terminating".into(), attempt);
                }
                Err(AttemptError::Unexpected(message)) => {
                    return outcome(OutcomeKind::Unexpected, message, attempt);
                }
                Err(AttemptError::Transient(e)) => {
                    warn!(
                        repo = %reference,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Clone attempt failed"
                    );
                    last_error = e.to_string();
                    if self.ctx.is_cancelled() {
                        return outcome(OutcomeKind::Terminating, "terminating".into(), attempt);
                    }
                    if attempt < max_attempts {
                        // Cut short by cancellation; the next pass sees the flag.
                        tokio::select! {
                            _ = tokio::time::sleep(self.retry.delay_after(attempt)) => {}
                            _ = self.ctx.cancelled() => {}
                        }
                    }
                }
            }
        }

        outcome(
            OutcomeKind::Exhausted,
            format!("failed after {} attempts: {}", max_attempts, last_error),
            max_attempts,
        )
    }

    async fn attempt(
        &self,
        reference: &RepositoryReference,
        owner_dir: &Path,
        staging: &Path,
        target: &Path,
    ) -> Result<Attempt, AttemptError> {
        let unexpected =
            |what: &str, e: io::Error| AttemptError::Unexpected(format!("{}: {}", what, e));

        tokio::fs::create_dir_all(owner_dir)
            .await
            .map_err(|e| unexpected("cannot create owner directory", e))?;
        // Debris from an earlier, killed run.
        match tokio::fs::remove_dir_all(staging).await {
            Ok(()) => debug!(path = %staging.display(), "Removed stale staging directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(unexpected("cannot clear staging directory", e)),
        }

        let Some(guard) = StagingDir::claim(&self.ctx, staging.to_path_buf()) else {
            return Ok(Attempt::Cancelled);
        };

        let tool = Arc::clone(&self.tool);
        let url = reference.canonical_url.clone();
        let dir = staging.to_path_buf();
        let joined = tokio::task::spawn_blocking(move || materialize(&*tool, &url, &dir))
            .await;

        match joined {
            Err(e) => Err(AttemptError::Unexpected(format!("clone worker failed: {}", e))),
            Ok(Err(e)) => Err(AttemptError::Transient(e)),
            Ok(Ok(())) => match guard.commit(target) {
                Ok(Commit::Committed) => Ok(Attempt::Committed),
                Ok(Commit::Cancelled) => Ok(Attempt::Cancelled),
                Err(e) => Err(unexpected("cannot move clone into place", e)),
            },
        }
    }
}

/// Runs the blocking part of one attempt: clone, branch, submodules.
fn materialize<C: CloneTool + ?Sized>(tool: &C, url: &str, dir: &Path) -> Result<(), CloneError> {
    tool.clone_repo(url, dir)?;
    normalize_branch(tool, dir);
    if tool.has_submodules(dir) {
        tool.sync_submodules(dir)?;
    }
    Ok(())
}

/// Checks out the first existing [`BRANCH_CANDIDATES`] entry. Missing
/// candidates are not an error.
fn normalize_branch<C: CloneTool + ?Sized>(tool: &C, dir: &Path) -> Option<&'static str> {
    for branch in BRANCH_CANDIDATES {
        match tool.checkout_branch(dir, branch) {
            Ok(()) => return Some(branch),
            Err(e) => debug!(branch, error = %e, "Branch candidate unavailable"),
        }
    }
    info!(path = %dir.display(), "Neither main nor master exists, keeping default branch");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::traits::FixedDelay;
    use crate::testing::FakeGit;
    use std::time::Duration;
    use tempfile::TempDir;

    const URL: &str = "https://github.com/owner/repo";

    fn cloner(
        git: FakeGit,
        attempts: u32,
        delay: Duration,
        out: &Path,
    ) -> (RepositoryCloner<FakeGit>, Arc<FakeGit>, Arc<RunContext>) {
        let git = Arc::new(git);
        let ctx = Arc::new(RunContext::new());
        let retry = Arc::new(FixedDelay { attempts, delay });
        (
            RepositoryCloner::new(Arc::clone(&git), retry, Arc::clone(&ctx), out),
            git,
            ctx,
        )
    }

    #[tokio::test]
    async fn test_successful_clone_commits_target() {
        let tmp = TempDir::new().unwrap();
        let (cloner, git, ctx) = cloner(FakeGit::new(), 3, Duration::ZERO, tmp.path());

        let outcome = cloner
            .clone_repository("https://github.com//owner/repo/?tab=readme")
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts_used, 1);
        assert!(tmp.path().join("owner/repo/README.md").exists());
        assert!(!tmp.path().join("owner/.repo.partial").exists());
        assert_eq!(git.clone_count(URL), 1);
        assert_eq!(*git.checkouts.lock().unwrap(), vec!["main".to_string()]);
        assert_eq!(ctx.tally().succeeded, 1);
    }

    #[tokio::test]
    async fn test_branch_falls_back_to_master() {
        let tmp = TempDir::new().unwrap();
        let git = FakeGit::new().with_branches(&["master"]);
        let (cloner, git, _) = cloner(git, 3, Duration::ZERO, tmp.path());

        assert!(cloner.clone_repository(URL).await.success);
        assert_eq!(*git.checkouts.lock().unwrap(), vec!["main", "master"]);
    }

    #[tokio::test]
    async fn test_missing_branches_do_not_fail_clone() {
        let tmp = TempDir::new().unwrap();
        let git = FakeGit::new().with_branches(&["develop"]);
        let (cloner, _, _) = cloner(git, 3, Duration::ZERO, tmp.path());

        assert!(cloner.clone_repository(URL).await.success);
    }

    #[tokio::test]
    async fn test_submodules_are_synced() {
        let tmp = TempDir::new().unwrap();
        let git = FakeGit::new().with_submodules();
        let (cloner, git, _) = cloner(git, 3, Duration::ZERO, tmp.path());

        assert!(cloner.clone_repository(URL).await.success);
        assert_eq!(git.submodule_syncs.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let tmp = TempDir::new().unwrap();
        let git = FakeGit::new().failing(URL, 2);
        let (cloner, git, _) = cloner(git, 3, Duration::from_millis(5), tmp.path());

        let outcome = cloner.clone_repository(URL).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts_used, 3);
        assert_eq!(git.clone_count(URL), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let tmp = TempDir::new().unwrap();
        let delay = Duration::from_millis(40);
        let git = FakeGit::new().failing(URL, u32::MAX);
        let (cloner, git, ctx) = cloner(git, 3, delay, tmp.path());

        let started = Instant::now();
        let outcome = cloner.clone_repository(URL).await;

        assert_eq!(outcome.kind, OutcomeKind::Exhausted);
        assert_eq!(outcome.attempts_used, 3);
        assert_eq!(git.clone_count(URL), 3);
        // Two gaps between three attempts.
        assert!(started.elapsed() >= delay * 2);
        assert!(!tmp.path().join("owner/repo").exists());
        assert!(!tmp.path().join("owner/.repo.partial").exists());
        assert_eq!(ctx.tally().failed, 1);
    }

    #[tokio::test]
    async fn test_existing_target_is_skipped() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("owner/repo")).unwrap();
        let (cloner, git, ctx) = cloner(FakeGit::new(), 3, Duration::ZERO, tmp.path());

        let outcome = cloner.clone_repository(URL).await;

        assert_eq!(outcome.kind, OutcomeKind::AlreadyExists);
        assert_eq!(outcome.message, "already exists");
        assert_eq!(git.clone_count(URL), 0);
        assert_eq!(ctx.tally().skipped, 1);
    }

    #[tokio::test]
    async fn test_malformed_url_is_not_retried() {
        let tmp = TempDir::new().unwrap();
        let (cloner, git, _) = cloner(FakeGit::new(), 3, Duration::ZERO, tmp.path());

        let outcome = cloner.clone_repository("https://github.com/just-an-owner").await;

        assert_eq!(outcome.kind, OutcomeKind::Malformed);
        assert_eq!(outcome.attempts_used, 0);
        assert!(git.clone_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_no_io() {
        let tmp = TempDir::new().unwrap();
        let (cloner, git, ctx) = cloner(FakeGit::new(), 3, Duration::ZERO, tmp.path());
        ctx.cancel();

        let outcome = cloner.clone_repository(URL).await;

        assert_eq!(outcome.kind, OutcomeKind::Terminating);
        assert_eq!(outcome.message, "terminating");
        assert_eq!(git.clone_count(URL), 0);
        assert!(!tmp.path().join("owner").exists());
    }

    #[tokio::test]
    async fn test_cancel_mid_clone_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let git = FakeGit::new().with_latency(Duration::from_millis(200));
        let (cloner, _, ctx) = cloner(git, 3, Duration::ZERO, tmp.path());
        let cloner = Arc::new(cloner);

        let running = tokio::spawn({
            let cloner = Arc::clone(&cloner);
            async move { cloner.clone_repository(URL).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel();
        let outcome = running.await.unwrap();

        assert_eq!(outcome.kind, OutcomeKind::Terminating);
        assert!(!tmp.path().join("owner/repo").exists());
        assert!(!tmp.path().join("owner/.repo.partial").exists());
    }

    #[tokio::test]
    async fn test_cancel_cuts_retry_delay_short() {
        let tmp = TempDir::new().unwrap();
        let git = FakeGit::new()
            .failing(URL, u32::MAX)
            .with_latency(Duration::from_millis(100));
        let (cloner, git, ctx) = cloner(git, 3, Duration::from_secs(4), tmp.path());
        let cloner = Arc::new(cloner);

        let running = tokio::spawn({
            let cloner = Arc::clone(&cloner);
            async move { cloner.clone_repository(URL).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let cancelled_at = Instant::now();
        ctx.cancel();
        let outcome = running.await.unwrap();

        assert_eq!(outcome.kind, OutcomeKind::Terminating);
        assert!(cancelled_at.elapsed() < Duration::from_secs(2));
        assert_eq!(git.clone_count(URL), 1);
        assert!(!tmp.path().join("owner/.repo.partial").exists());
    }

    #[tokio::test]
    async fn test_cancel_during_retry_delay() {
        let tmp = TempDir::new().unwrap();
        let git = FakeGit::new().failing(URL, u32::MAX);
        let (cloner, git, ctx) = cloner(git, 3, Duration::from_secs(4), tmp.path());
        let cloner = Arc::new(cloner);

        let running = tokio::spawn({
            let cloner = Arc::clone(&cloner);
            async move { cloner.clone_repository(URL).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let cancelled_at = Instant::now();
        ctx.cancel();
        let outcome = running.await.unwrap();

        assert_eq!(outcome.kind, OutcomeKind::Terminating);
        assert_eq!(outcome.attempts_used, 1);
        assert!(cancelled_at.elapsed() < Duration::from_secs(2));
        assert_eq!(git.clone_count(URL), 1);
    }

    #[tokio::test]
    async fn test_panicking_tool_is_terminal() {
        let tmp = TempDir::new().unwrap();
        let git = FakeGit::new().panicking_on(URL);
        let (cloner, git, _) = cloner(git, 3, Duration::ZERO, tmp.path());

        let outcome = cloner.clone_repository(URL).await;

        assert_eq!(outcome.kind, OutcomeKind::Unexpected);
        assert_eq!(outcome.attempts_used, 1);
        assert_eq!(git.clone_count(URL), 1);
        assert!(!tmp.path().join("owner/.repo.partial").exists());
    }

    #[tokio::test]
    async fn test_stale_staging_is_replaced() {
        let tmp = TempDir::new().unwrap();
        let stale = tmp.path().join("owner/.repo.partial");
        std::fs::create_dir_all(stale.join("junk")).unwrap();
        let (cloner, _, _) = cloner(FakeGit::new(), 1, Duration::ZERO, tmp.path());

        assert!(cloner.clone_repository(URL).await.success);
        assert!(!tmp.path().join("owner/repo/junk").exists());
    }
}
