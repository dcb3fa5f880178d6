//! Two-phase harvest pipeline.
//!
//! [`HarvestPipeline::run`] processes one ecosystem's candidate list:
//! 1. **Discovery**: every candidate repository is crawled through the
//!    listing scheduler and its files are matched against the ecosystem's
//!    [`NameFilter`]. A repository with at least one match is accepted.
//! 2. **Retrieval**: after every crawl has finished, the matched files are
//!    downloaded (file mode) or the accepted repositories are cloned
//!    (clone mode) through a second, independently bounded scheduler.
//!
//! Both schedulers are registered with the [`CancellationCoordinator`], so an
//! interrupt stops admission in whichever phase is running.

use crate::crawler::TreeCrawler;
use crate::executor::{ConcurrencyScheduler, UnitResult, LISTING_CONCURRENCY};
use crate::filter::NameFilter;
use crate::harvest::cancel::CancellationCoordinator;
use crate::harvest::clone::RepositoryCloner;
use crate::harvest::download::FileDownloader;
use crate::harvest::report::{OutcomeLog, RunSummary};
use crate::harvest::traits::{CloneTool, RetryStrategy};
use crate::model::{CloneOutcome, Ecosystem, OutcomeKind, RepositoryReference, RetrievalMode};
use crate::traits::TreeApi;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

// ============================================================================
// Pipeline Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Base of the contents API, e.g. `https://api.github.com`.
    pub api_base: String,

    /// Descend into directories while crawling.
    pub recursive: bool,

    /// Directory levels below the repository root to descend into.
    pub max_depth: Option<usize>,

    /// Concurrent crawls and downloads.
    pub listing_concurrency: usize,

    /// Concurrent clones.
    pub clone_concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            recursive: false,
            max_depth: None,
            listing_concurrency: LISTING_CONCURRENCY,
            clone_concurrency: crate::executor::clone_concurrency(),
        }
    }
}

/// Result of the discovery phase.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Repositories with at least one matching file.
    pub accepted: Vec<RepositoryReference>,

    /// Download URLs of every matching file.
    pub files: Vec<String>,

    /// Candidates that do not name a repository.
    pub malformed: Vec<String>,
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Discovery and retrieval over a [`TreeApi`] and a [`CloneTool`].
///
/// # Thread Safety
///
/// The pipeline is `Send + Sync`; ecosystems are processed one after another
/// by calling [`HarvestPipeline::run`] repeatedly on the same instance.
pub struct HarvestPipeline<A, C>
where
    A: TreeApi + 'static,
    C: CloneTool + 'static,
{
    api: Arc<A>,
    tool: Arc<C>,
    retry: Arc<dyn RetryStrategy>,
    coordinator: Arc<CancellationCoordinator>,
    output_root: PathBuf,
    outcome_log: Option<Arc<OutcomeLog>>,
    options: PipelineOptions,
}

impl<A, C> HarvestPipeline<A, C>
where
    A: TreeApi + 'static,
    C: CloneTool + 'static,
{
    pub fn new(
        api: Arc<A>,
        tool: Arc<C>,
        retry: Arc<dyn RetryStrategy>,
        coordinator: Arc<CancellationCoordinator>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            tool,
            retry,
            coordinator,
            output_root: output_root.into(),
            outcome_log: None,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Appends every clone outcome to `log`.
    pub fn with_outcome_log(mut self, log: Arc<OutcomeLog>) -> Self {
        self.outcome_log = Some(log);
        self
    }

    /// `output_root/<ecosystem>`.
    pub fn output_dir(&self, ecosystem: Ecosystem) -> PathBuf {
        self.output_root.join(ecosystem.name())
    }

    /// Runs both phases for one ecosystem and summarizes what happened.
    ///
    /// Never fails: per-item failures are counted in the summary, and an
    /// interrupt ends the run early with `cancelled` set.
    #[instrument(skip_all, fields(ecosystem = %ecosystem, mode = %mode))]
    pub async fn run(
        &self,
        ecosystem: Ecosystem,
        candidates: Vec<String>,
        mode: RetrievalMode,
    ) -> RunSummary {
        let started = Instant::now();
        let ctx = self.coordinator.context();
        let before = ctx.tally();

        let mut summary = RunSummary::new(ecosystem, mode);
        summary.candidates = candidates.len();

        info!(candidates = candidates.len(), "Starting discovery");
        let discovery = self.discover(ecosystem, candidates).await;
        summary.accepted = discovery.accepted.len();
        summary.matched_files = discovery.files.len();
        info!(
            accepted = summary.accepted,
            files = summary.matched_files,
            malformed = discovery.malformed.len(),
            "Discovery completed"
        );

        let output_dir = self.output_dir(ecosystem);
        match mode {
            RetrievalMode::Files => self.fetch_files(discovery.files, &output_dir).await,
            RetrievalMode::Clone => {
                let mut targets: Vec<String> = discovery
                    .accepted
                    .into_iter()
                    .map(|r| r.canonical_url)
                    .collect();
                // Unparseable candidates get a terminal outcome of their own.
                targets.extend(discovery.malformed);
                self.clone_repositories(targets, &output_dir).await;
            }
        }

        summary.apply(ctx.tally().since(before));
        summary.cancelled = ctx.is_cancelled();
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            duration_ms = summary.elapsed_ms,
            "Retrieval completed"
        );
        summary
    }

    /// Crawls every candidate and keeps the repositories with matching files.
    ///
    /// Candidates naming the same repository are crawled once.
    pub async fn discover(&self, ecosystem: Ecosystem, candidates: Vec<String>) -> Discovery {
        let mut discovery = Discovery::default();
        let mut seen = HashSet::new();
        let mut references = Vec::new();
        for raw in candidates {
            match RepositoryReference::parse(&raw) {
                Ok(reference) => {
                    if seen.insert(reference.canonical_url.clone()) {
                        references.push(reference);
                    }
                }
                Err(e) => {
                    warn!(url = %raw, error = %e, "Skipping malformed repository URL");
                    discovery.malformed.push(raw);
                }
            }
        }

        let ctx = Arc::clone(self.coordinator.context());
        let scheduler = self.scheduler("discovery", self.options.listing_concurrency);

        let crawler = Arc::new(
            TreeCrawler::new(Arc::clone(&self.api), ctx)
                .with_max_depth(self.options.max_depth),
        );
        let filter = Arc::new(NameFilter::for_ecosystem(ecosystem));
        let api_base = self.options.api_base.clone();
        let recursive = self.options.recursive;

        let results = scheduler
            .run_all(references, move |reference: RepositoryReference| {
                let crawler = Arc::clone(&crawler);
                let filter = Arc::clone(&filter);
                let listing_url = reference.contents_url(&api_base);
                async move {
                    let files = filter.apply(crawler.crawl(&listing_url, recursive).await);
                    (reference, files)
                }
            })
            .await;

        for result in results {
            match result {
                UnitResult::Completed((reference, files)) => {
                    if files.is_empty() {
                        info!(repo = %reference, "No matching files");
                    } else {
                        info!(repo = %reference, matches = files.len(), "Found matching files");
                        discovery.files.extend(files);
                        discovery.accepted.push(reference);
                    }
                }
                UnitResult::NotAdmitted(reference) => {
                    info!(repo = %reference, "Crawl not started, run is shutting down");
                }
                UnitResult::Panicked { item, message } => {
                    warn!(repo = %item, panic = %message, "Crawl panicked");
                }
            }
        }
        discovery
    }

    /// File-mode retrieval. Every file is attempted at most once.
    pub async fn fetch_files(&self, files: Vec<String>, output_dir: &Path) {
        let ctx = Arc::clone(self.coordinator.context());
        let scheduler = self.scheduler("download", self.options.listing_concurrency);

        let downloader = Arc::new(FileDownloader::new(
            Arc::clone(&self.api),
            Arc::clone(&ctx),
            output_dir,
        ));
        let results = scheduler
            .run_all(files, move |url: String| {
                let downloader = Arc::clone(&downloader);
                async move { downloader.fetch(&url).await }
            })
            .await;

        for result in results {
            match result {
                // Counted by the downloader.
                UnitResult::Completed(_) => {}
                UnitResult::NotAdmitted(_) => ctx.record_skip(),
                UnitResult::Panicked { item, message } => {
                    ctx.record_failure();
                    warn!(url = %item, panic = %message, "Download panicked");
                }
            }
        }
    }

    /// Clone-mode retrieval. Returns one outcome per target.
    pub async fn clone_repositories(
        &self,
        urls: Vec<String>,
        output_dir: &Path,
    ) -> Vec<CloneOutcome> {
        let ctx = Arc::clone(self.coordinator.context());
        let scheduler = self.scheduler("clone", self.options.clone_concurrency);

        let cloner = Arc::new(RepositoryCloner::new(
            Arc::clone(&self.tool),
            Arc::clone(&self.retry),
            Arc::clone(&ctx),
            output_dir,
        ));
        let log = self.outcome_log.clone();
        info!(repositories = urls.len(), limit = scheduler.limit(), "Cloning");

        let results = scheduler
            .run_all(urls, move |url: String| {
                let cloner = Arc::clone(&cloner);
                let log = log.clone();
                async move {
                    let outcome = cloner.clone_repository(&url).await;
                    if let Some(log) = &log {
                        log.record(&outcome);
                    }
                    outcome
                }
            })
            .await;

        let mut outcomes = Vec::with_capacity(results.len());
        for result in results {
            let outcome = match result {
                UnitResult::Completed(outcome) => outcome,
                UnitResult::NotAdmitted(url) => {
                    ctx.record_failure();
                    let outcome = CloneOutcome::new(
                        &url,
                        None,
                        OutcomeKind::Terminating,
                        "terminating",
                        0,
                    );
                    self.record_outcome(outcome)
                }
                UnitResult::Panicked { item, message } => {
                    ctx.record_failure();
                    warn!(url = %item, panic = %message, "Clone panicked");
                    let outcome =
                        CloneOutcome::new(&item, None, OutcomeKind::Unexpected, message, 0);
                    self.record_outcome(outcome)
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// A scheduler whose gate the interrupt handler can close.
    fn scheduler(&self, name: &'static str, limit: usize) -> ConcurrencyScheduler {
        let ctx = Arc::clone(self.coordinator.context());
        let scheduler = ConcurrencyScheduler::new(name, limit, ctx);
        self.coordinator.guard(&scheduler);
        scheduler
    }

    fn record_outcome(&self, outcome: CloneOutcome) -> CloneOutcome {
        if let Some(log) = &self.outcome_log {
            log.record(&outcome);
        }
        outcome
    }
}

// ============================================================================
// Tests
// ============================================================================
