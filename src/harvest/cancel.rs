//! Interrupt handling.
//!
//! [`CancellationCoordinator::trigger`] is the only way a run is stopped:
//! it sets the shared flag once, closes every registered admission gate so
//! queued units are never started, and deletes the staging directories of
//! units that are still running. Running units are not aborted; they notice
//! the flag before committing and discard their work.

use crate::context::RunContext;
use crate::executor::ConcurrencyScheduler;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct CancellationCoordinator {
    ctx: Arc<RunContext>,
    gates: Mutex<Vec<Arc<Semaphore>>>,
}

impl CancellationCoordinator {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self {
            ctx,
            gates: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Puts `scheduler`'s gate under this coordinator. A gate registered
    /// after cancellation is closed immediately.
    pub fn guard(&self, scheduler: &ConcurrencyScheduler) {
        let gate = scheduler.gate();
        let mut gates = match self.gates.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.ctx.is_cancelled() {
            gate.close();
        }
        gates.push(gate);
    }

    /// Stops the run. Returns `false` if it was already stopped.
    pub fn trigger(&self) -> bool {
        let gates = match self.gates.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !self.ctx.cancel() {
            return false;
        }
        for gate in gates.iter() {
            gate.close();
        }
        warn!(gates = gates.len(), "Interrupted, no new work will be started");
        true
    }

    /// [`trigger`](Self::trigger) from async code. Staging removal can touch
    /// large trees, so it runs on a blocking thread.
    pub async fn interrupt(self: &Arc<Self>) -> bool {
        let coordinator = Arc::clone(self);
        match tokio::task::spawn_blocking(move || coordinator.trigger()).await {
            Ok(triggered) => triggered,
            Err(e) => {
                error!(error = %e, "Interrupt cleanup failed");
                false
            }
        }
    }

    /// Triggers on the first Ctrl-C.
    pub fn listen(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received interrupt, cleaning up");
                    coordinator.interrupt().await;
                }
                Err(e) => error!(error = %e, "Cannot listen for interrupts"),
            }
        })
    }
}
