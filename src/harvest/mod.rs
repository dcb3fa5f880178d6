//! Retrieval stage of the harvester.
//!
//! This module provides everything that runs after a repository is known:
//! - **Traits**: [`CloneTool`] and [`RetryStrategy`] seams with their errors
//! - **Download**: file-mode retrieval via [`FileDownloader`]
//! - **Clone**: the clone state machine in [`RepositoryCloner`], backed by [`GitCli`]
//! - **Cancel**: interrupt handling via [`CancellationCoordinator`]
//! - **Report**: the JSON-lines [`OutcomeLog`] and per-ecosystem [`RunSummary`]
//! - **Pipeline**: the two-phase executor via [`pipeline::HarvestPipeline`]

pub mod cancel;
pub mod clone;
pub mod download;
pub mod git;
pub mod pipeline;
pub mod report;
pub mod traits;

// Re-export commonly used types
pub use traits::{CloneError, CloneTool, ExponentialBackoff, FixedDelay, RetryStrategy};

pub use cancel::CancellationCoordinator;
pub use clone::{RepositoryCloner, BRANCH_CANDIDATES};
pub use download::{DownloadStatus, FileDownloader};
pub use git::GitCli;
pub use pipeline::{Discovery, HarvestPipeline, PipelineOptions};
pub use report::{OutcomeLog, RunSummary};
