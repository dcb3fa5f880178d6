use crate::context::RunContext;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

/// Default cap for remote listing and file download units.
pub const LISTING_CONCURRENCY: usize = 200;

/// Default cap for clone units: `max(32, 5 × cores)`.
pub fn clone_concurrency() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (5 * cores).max(32)
}

/// Terminal state of one scheduled unit.
#[derive(Debug)]
pub enum UnitResult<I, T> {
    Completed(T),
    /// The gate was closed or the run cancelled before the unit started.
    NotAdmitted(I),
    Panicked { item: I, message: String },
}

/// Runs independent units behind a counting admission gate.
///
/// At most `limit` units hold a permit at once. Results are returned in
/// completion order.
pub struct ConcurrencyScheduler {
    name: &'static str,
    limit: usize,
    semaphore: Arc<Semaphore>,
    ctx: Arc<RunContext>,
}

impl ConcurrencyScheduler {
    pub fn new(name: &'static str, limit: usize, ctx: Arc<RunContext>) -> Self {
        let limit = limit.max(1);
        Self {
            name,
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            ctx,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The admission gate, so a cancellation coordinator can close it.
    pub fn gate(&self) -> Arc<Semaphore> {
        Arc::clone(&self.semaphore)
    }

    #[instrument(skip_all, fields(scheduler = self.name, units = items.len(), limit = self.limit))]
    pub async fn run_all<I, F, Fut, T>(&self, items: Vec<I>, work: F) -> Vec<UnitResult<I, T>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let work = Arc::new(work);
        let mut units = JoinSet::new();

        for item in items {
            let semaphore = Arc::clone(&self.semaphore);
            let ctx = Arc::clone(&self.ctx);
            let work = Arc::clone(&work);

            units.spawn(async move {
                // The permit is held until this block returns, on every path.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return UnitResult::NotAdmitted(item),
                };
                if ctx.is_cancelled() {
                    return UnitResult::NotAdmitted(item);
                }

                match AssertUnwindSafe((*work)(item.clone())).catch_unwind().await {
                    Ok(value) => UnitResult::Completed(value),
                    Err(payload) => UnitResult::Panicked {
                        item,
                        message: panic_message(payload.as_ref()),
                    },
                }
            });
        }

        let mut results = Vec::with_capacity(units.len());
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(scheduler = self.name, error = %e, "Unit task aborted"),
            }
        }

        debug!(scheduler = self.name, completed = results.len(), "All units finished");
        results
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
