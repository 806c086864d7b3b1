//! Background loop that polls the store for due workflows and dispatches
//! them to the executor under a bounded in-flight cap.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::executor::WorkflowExecutor;
use crate::persistence::store::WorkflowStore;

pub struct WorkflowQueue<S: WorkflowStore> {
    store: Arc<S>,
    executor: Arc<WorkflowExecutor<S>>,
    limit: usize,
    query_backoff: Duration,
    in_flight: Mutex<HashSet<Uuid>>,
    running: AtomicBool,
}

impl<S: WorkflowStore> WorkflowQueue<S> {
    pub fn new(store: Arc<S>, executor: Arc<WorkflowExecutor<S>>, config: &EngineConfig) -> Self {
        Self {
            store,
            executor,
            limit: config.queue_limit,
            query_backoff: config.queue_backoff,
            in_flight: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Starts the poll loop as a background task. Returns the handle so
    /// the caller can hold onto it, but forward progress never depends on
    /// anyone awaiting it.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// Clears the running flag and polls (every 500ms) until the in-flight
    /// set drains to zero.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        while !self.in_flight.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn run(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let available = {
                let in_flight = self.in_flight.lock();
                self.limit.saturating_sub(in_flight.len())
            };

            if available > 0 {
                match self
                    .store
                    .get_executable_workflows(chrono::Utc::now(), available)
                    .await
                {
                    Ok(workflows) => {
                        for workflow in workflows {
                            self.dispatch(workflow);
                        }
                    }
                    Err(e) => error!(error = %e, "failed to poll executable workflows"),
                }
            }

            tokio::time::sleep(self.query_backoff).await;
        }
    }

    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    fn dispatch(self: &Arc<Self>, workflow: crate::workflow::model::Workflow) {
        let id = workflow.id;
        self.in_flight.lock().insert(id);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.executor.execute(workflow).await {
                error!(workflow_id = %id, error = %e, "workflow execution failed");
            } else {
                info!(workflow_id = %id, "workflow dispatch completed");
            }
            this.in_flight.lock().remove(&id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::model::Activity;
    use crate::activity::plugin::{ActivityFailure, ActivityPlugin};
    use crate::engine::registry::{Plugin, PluginRegistry};
    use crate::persistence::memory::InMemoryWorkflowStore;
    use crate::workflow::model::{CreateWorkflowInput, WorkflowState};
    use crate::workflow::plugin::WorkflowPlugin;
    use crate::workflow::Workflow;
    use async_trait::async_trait;

    struct AlwaysSucceed(&'static str);

    impl Plugin for AlwaysSucceed {
        fn plugin_type(&self) -> &str {
            self.0
        }
    }

    #[async_trait]
    impl ActivityPlugin for AlwaysSucceed {
        async fn execute(&self, _: &Workflow, _: &Activity) -> Result<(), ActivityFailure> {
            Ok(())
        }
        async fn rollback(&self, _: &Workflow, _: &Activity) -> Result<(), ActivityFailure> {
            Ok(())
        }
    }

    struct SinglePlan;
    impl Plugin for SinglePlan {
        fn plugin_type(&self) -> &str {
            "checkout"
        }
    }
    #[async_trait]
    impl WorkflowPlugin for SinglePlan {
        async fn plan(&self, _: &Workflow) -> Vec<String> {
            vec!["charge-card".to_string()]
        }
    }

    #[tokio::test]
    async fn queue_admits_and_drives_to_terminal() {
        let store = Arc::new(InMemoryWorkflowStore::default());
        let workflow_plugins = Arc::new(PluginRegistry::new());
        workflow_plugins.register(Arc::new(SinglePlan));
        let activity_plugins = Arc::new(PluginRegistry::new());
        activity_plugins.register(Arc::new(AlwaysSucceed("charge-card")));

        let executor = Arc::new(WorkflowExecutor::new(
            store.clone(),
            workflow_plugins,
            activity_plugins,
        ));

        let mut config = EngineConfig::default();
        config.queue_backoff = Duration::from_millis(20);
        let queue = Arc::new(WorkflowQueue::new(store.clone(), executor, &config));

        let workflow = store
            .create_workflow(
                CreateWorkflowInput::new(Uuid::new_v4(), "checkout")
                    .with_execute_at(chrono::Utc::now()),
            )
            .await
            .unwrap();

        queue.start();

        let mut terminal = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let reloaded = store.get_workflow_by_id(workflow.id).await.unwrap().unwrap();
            if reloaded.state == WorkflowState::Succeeded {
                terminal = true;
                break;
            }
        }
        queue.stop().await;
        assert!(terminal, "workflow did not reach succeeded via the queue");
    }

    #[tokio::test]
    async fn queue_traps_unknown_plugin_errors() {
        let store = Arc::new(InMemoryWorkflowStore::default());
        let workflow_plugins = Arc::new(PluginRegistry::new());
        workflow_plugins.register(Arc::new(SinglePlan));
        let activity_plugins = Arc::new(PluginRegistry::new());
        // intentionally no activity plugin registered

        let executor = Arc::new(WorkflowExecutor::new(
            store.clone(),
            workflow_plugins,
            activity_plugins,
        ));

        let mut config = EngineConfig::default();
        config.queue_backoff = Duration::from_millis(20);
        let queue = Arc::new(WorkflowQueue::new(store.clone(), executor, &config));

        let workflow = store
            .create_workflow(
                CreateWorkflowInput::new(Uuid::new_v4(), "checkout")
                    .with_execute_at(chrono::Utc::now()),
            )
            .await
            .unwrap();

        queue.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.stop().await;

        let reloaded = store.get_workflow_by_id(workflow.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, WorkflowState::Running);
    }
}
