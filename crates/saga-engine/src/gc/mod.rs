//! Background sweep that rescues workflows stuck in a non-terminal
//! in-flight state past the liveness window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::persistence::store::WorkflowStore;
use crate::workflow::model::{Workflow, WorkflowState};

/// Periodically requeues workflows whose `created_at` falls in the
/// liveness window but whose state has not advanced — the complement to
/// the lock's `expire_at`, for holders that crashed without ever taking
/// the lock (or whose lock later expired with no GC trigger of its own).
pub struct WorkflowGc<S: WorkflowStore> {
    store: Arc<S>,
    limit: usize,
    sweep_interval: Duration,
    lookback: chrono::Duration,
    cutoff: chrono::Duration,
    running: AtomicBool,
}

impl<S: WorkflowStore> WorkflowGc<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            store,
            limit: config.queue_limit,
            sweep_interval: config.gc_sweep_interval,
            lookback: config.gc_lookback_chrono(),
            cutoff: config.gc_cutoff_chrono(),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Starts the sweep loop as a background task.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// Clears the running flag. In-flight collects complete naturally;
    /// unlike the queue, there is nothing to drain.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            self.sweep().await;
            tokio::time::sleep(self.sweep_interval).await;
        }
    }

    #[instrument(skip(self))]
    async fn sweep(&self) {
        let lost = match self
            .store
            .get_lost_workflows(self.limit, self.lookback, self.cutoff)
            .await
        {
            Ok(workflows) => workflows,
            Err(e) => {
                error!(error = %e, "failed to poll lost workflows");
                return;
            }
        };

        if lost.is_empty() {
            return;
        }
        info!(count = lost.len(), "gc rescuing lost workflows");

        let rescues = lost.into_iter().map(|workflow| self.rescue(workflow));
        join_all(rescues).await;
    }

    /// Requeues a single lost workflow. Independent and idempotent: safe
    /// to run concurrently with rescues of other workflows in the same
    /// batch.
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    async fn rescue(&self, mut workflow: Workflow) {
        workflow.execute_at = Some(chrono::Utc::now());
        let workflow = match self.store.update_workflow(&workflow).await {
            Ok(w) => w,
            Err(e) => {
                warn!(workflow_id = %workflow.id, error = %e, "failed to update execute_at during gc rescue");
                return;
            }
        };
        if let Err(e) = self
            .store
            .set_workflow_state(&workflow, WorkflowState::Queued)
            .await
        {
            warn!(workflow_id = %workflow.id, error = %e, "failed to requeue during gc rescue");
        }
    }
}
