//! Remote tree traversal.
//!
//! [`TreeCrawler`] expands a listing URL into the flat set of file download
//! URLs beneath it. Directory recursion runs as a bounded worker pool over a
//! shared queue seeded with the root: each expanded directory pushes its
//! children back onto the queue instead of recursing on the call stack.
//! Cancellation is observed before every new listing is started.

use crate::context::RunContext;
use crate::model::EntryKind;
use crate::traits::{ApiError, TreeApi};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Listings fetched concurrently within a single crawl.
pub const DEFAULT_CRAWL_WIDTH: usize = 16;

pub struct TreeCrawler<A: TreeApi + 'static> {
    api: Arc<A>,
    ctx: Arc<RunContext>,
    width: usize,
    max_depth: Option<usize>,
}

impl<A: TreeApi + 'static> TreeCrawler<A> {
    pub fn new(api: Arc<A>, ctx: Arc<RunContext>) -> Self {
        Self {
            api,
            ctx,
            width: DEFAULT_CRAWL_WIDTH,
            max_depth: None,
        }
    }

    /// Limits recursion to `depth` directory levels below the root.
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Returns every file `download_url` reachable from `listing_url`.
    ///
    /// A listing that fails (non-OK status, transport or decode error) is
    /// logged and contributes no files; it never aborts the crawl. With
    /// `recursive == false` directories are ignored entirely. Output order
    /// is unspecified.
    pub async fn crawl(&self, listing_url: &str, recursive: bool) -> Vec<String> {
        let mut pending: VecDeque<(String, usize)> = VecDeque::from([(listing_url.to_string(), 0)]);
        let mut listings = JoinSet::new();
        let mut files = Vec::new();

        loop {
            while listings.len() < self.width {
                let Some((url, depth)) = pending.pop_front() else {
                    break;
                };
                if self.ctx.is_cancelled() {
                    debug!(root = listing_url, dropped = pending.len() + 1, "Crawl cancelled");
                    pending.clear();
                    break;
                }
                let api = Arc::clone(&self.api);
                listings.spawn(async move {
                    let result = api.list(&url).await;
                    (url, depth, result)
                });
            }

            let Some(joined) = listings.join_next().await else {
                break;
            };
            let (url, depth, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(root = listing_url, error = %e, "Listing task aborted");
                    continue;
                }
            };

            let entries = match result {
                Ok(entries) => entries,
                Err(ApiError::Status { status, .. }) => {
                    warn!(url = %url, status, "Error fetching listing");
                    continue;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Listing failed");
                    continue;
                }
            };

            for entry in entries {
                match entry.kind {
                    EntryKind::File => match entry.download_url {
                        Some(download) => files.push(download),
                        None => debug!(path = %entry.path, "File entry without download URL"),
                    },
                    EntryKind::Dir if recursive && self.may_descend(depth) => {
                        if let Some(child) = entry.child_tree_url {
                            pending.push_back((child, depth + 1));
                        }
                    }
                    _ => {}
                }
            }
        }

        files
    }

    fn may_descend(&self, depth: usize) -> bool {
        self.max_depth.map_or(true, |max| depth < max)
    }
}
