//! Seams of the retrieval stage.
//!
//! This module defines the pieces the clone pipeline is generic over:
//! - [`CloneTool`]: the external version-control tool, narrowed to the three
//!   operations the pipeline needs
//! - [`RetryStrategy`]: how many attempts a clone gets and how long to wait
//!   between them
//! - [`CloneError`]: failures reported by a clone tool

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Clone Tool
// ============================================================================

/// Errors reported by a [`CloneTool`].
///
/// Every variant is considered transient by the clone pipeline and is
/// retried within the attempt budget.
#[derive(Error, Debug)]
pub enum CloneError {
    /// The tool ran and exited unsuccessfully
    #[error("`{command}` failed ({}): {stderr}", exit_label(.code))]
    ToolFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The tool could not be started, or its working tree could not be prepared
    #[error("Failed to run clone tool: {0}")]
    Spawn(#[source] std::io::Error),

    /// The tool exceeded its per-invocation time limit and was killed
    #[error("`{command}` timed out after {timeout_secs}s")]
    TimedOut { command: String, timeout_secs: u64 },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit {}", c),
        None => "killed by signal".to_string(),
    }
}

/// Version-control operations used to materialize a repository locally.
///
/// Implementations are invoked from blocking worker threads and may block.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance serves every
/// concurrent clone of a run.
pub trait CloneTool: Send + Sync {
    /// Clones `url` into `dir`. `dir` does not exist beforehand.
    fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), CloneError>;

    /// Checks out `branch` in an existing clone.
    fn checkout_branch(&self, dir: &Path, branch: &str) -> Result<(), CloneError>;

    /// Initializes and updates submodules recursively.
    fn sync_submodules(&self, dir: &Path) -> Result<(), CloneError>;

    /// Whether the clone at `dir` declares submodules.
    fn has_submodules(&self, dir: &Path) -> bool {
        dir.join(".gitmodules").is_file()
    }
}

// ============================================================================
// Retry Strategy
// ============================================================================

/// Attempt budget and inter-attempt delay for clone retries.
pub trait RetryStrategy: Send + Sync {
    /// Total attempts allowed, including the first. Never zero.
    fn max_attempts(&self) -> u32;

    /// Delay to wait after failed attempt number `attempt` (1-based).
    fn delay_after(&self, attempt: u32) -> Duration;
}

/// Same delay between every pair of attempts.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(4),
        }
    }
}

impl RetryStrategy for FixedDelay {
    fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    fn delay_after(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Doubling delay, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub attempts: u32,
    pub base: Duration,
    pub max_delay: Duration,
}

impl RetryStrategy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max_delay)
    }
}
