use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::activity::executor::{ActivityExecutor, ActivityExecutorError};
use crate::activity::model::{rollback_activity_type, ActivityState};
use crate::config::EngineConfig;
use crate::engine::registry::{ActivityPluginRegistry, WorkflowPluginRegistry};
use crate::notifier::{NoopNotifier, Notifier};
use crate::persistence::store::{StoreError, WorkflowStore};
use crate::workflow::model::{CreateWorkflowInput, Workflow, WorkflowState};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowExecutorError {
    #[error("unknown workflow plugin: {0}")]
    UnknownWorkflowPlugin(String),

    #[error("unexpected workflow state: {0}")]
    UnexpectedState(WorkflowState),

    #[error("missing activity for workflow {workflow_id}, type {activity_type}")]
    MissingActivity {
        workflow_id: uuid::Uuid,
        activity_type: String,
    },

    #[error(transparent)]
    Activity(#[from] ActivityExecutorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-workflow state machine that drives planning, forward execution,
/// retry scheduling, and rollback.
pub struct WorkflowExecutor<S: WorkflowStore> {
    store: Arc<S>,
    workflow_plugins: Arc<WorkflowPluginRegistry>,
    activity_executor: ActivityExecutor<S>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl<S: WorkflowStore> WorkflowExecutor<S> {
    pub fn new(
        store: Arc<S>,
        workflow_plugins: Arc<WorkflowPluginRegistry>,
        activity_plugins: Arc<ActivityPluginRegistry>,
    ) -> Self {
        Self {
            activity_executor: ActivityExecutor::new(store.clone(), activity_plugins),
            store,
            workflow_plugins,
            notifier: Arc::new(NoopNotifier),
            config: EngineConfig::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn create(
        &self,
        input: CreateWorkflowInput,
    ) -> Result<Workflow, WorkflowExecutorError> {
        Ok(self.store.create_workflow(input).await?)
    }

    /// Acquires the workflow's lock (strict, not try-lock — the caller
    /// already owns the workflow), brackets the run with
    /// `begin_workflow`/`end_workflow`, and always releases the lock on
    /// every exit path.
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id, workflow_type = %workflow.workflow_type))]
    pub async fn execute(
        &self,
        mut workflow: Workflow,
    ) -> Result<Workflow, WorkflowExecutorError> {
        self.store.lock_workflow(&workflow).await?;
        self.notify_begin_workflow(&workflow).await;

        let result = self.drive(&mut workflow).await;

        self.notify_end_workflow(&workflow).await;
        if let Err(e) = self.store.unlock_workflow(&workflow).await {
            warn!(error = %e, "failed to release workflow lock");
        }

        result.map(|_| workflow)
    }

    async fn drive(&self, workflow: &mut Workflow) -> Result<(), WorkflowExecutorError> {
        loop {
            match workflow.state {
                WorkflowState::Queued => {
                    return Err(WorkflowExecutorError::UnexpectedState(workflow.state));
                }
                WorkflowState::Pending => self.plan(workflow).await?,
                WorkflowState::Running => self.forward_pass(workflow).await?,
                WorkflowState::RunningRetry => {
                    self.retry_scheduler(workflow).await?;
                    return Ok(());
                }
                WorkflowState::RunningRollback => self.rollback_pass(workflow).await?,
                WorkflowState::Failed | WorkflowState::FailedRollback | WorkflowState::Succeeded => {
                    return Ok(());
                }
            }
        }
    }

    async fn plan(&self, workflow: &mut Workflow) -> Result<(), WorkflowExecutorError> {
        // `activity_types` is assigned exactly once. A workflow re-admitted
        // after a retry arrives here already planned; just resume forward
        // execution instead of re-invoking the plugin.
        if !workflow.activity_types.is_empty() {
            *workflow = self
                .store
                .set_workflow_state(workflow, WorkflowState::Running)
                .await?;
            return Ok(());
        }

        let plugin_type = workflow.plugin_type().to_string();
        let plugin = self
            .workflow_plugins
            .lookup(&plugin_type)
            .ok_or(WorkflowExecutorError::UnknownWorkflowPlugin(plugin_type))?;

        let activity_types = plugin.plan(workflow).await;
        if activity_types.is_empty() {
            *workflow = self
                .store
                .set_workflow_state(workflow, WorkflowState::Failed)
                .await?;
            return Ok(());
        }

        workflow.activity_types = activity_types;
        *workflow = self.store.update_workflow(workflow).await?;
        *workflow = self
            .store
            .set_workflow_state(workflow, WorkflowState::Running)
            .await?;
        Ok(())
    }

    async fn forward_pass(&self, workflow: &mut Workflow) -> Result<(), WorkflowExecutorError> {
        let activity_types = workflow.activity_types.clone();
        for activity_type in activity_types {
            let activity = self.activity_executor.create(workflow, &activity_type).await?;
            self.notify_begin_activity(workflow, &activity).await;
            let result = self.activity_executor.execute(workflow, activity.clone()).await;
            self.notify_end_activity(workflow, result.as_ref().unwrap_or(&activity)).await;
            let activity = result?;

            match activity.state {
                ActivityState::FailedPermanent => {
                    *workflow = self
                        .store
                        .set_workflow_state(workflow, WorkflowState::RunningRollback)
                        .await?;
                    return Ok(());
                }
                ActivityState::FailedTemporary => {
                    *workflow = self
                        .store
                        .set_workflow_state(workflow, WorkflowState::RunningRetry)
                        .await?;
                    return Ok(());
                }
                ActivityState::Succeeded => continue,
                ActivityState::Pending | ActivityState::Running => {
                    unreachable!("activity executor always returns a terminal-for-pass state")
                }
            }
        }

        *workflow = self
            .store
            .set_workflow_state(workflow, WorkflowState::Succeeded)
            .await?;
        info!("workflow succeeded");
        Ok(())
    }

    async fn rollback_pass(&self, workflow: &mut Workflow) -> Result<(), WorkflowExecutorError> {
        let activity_types: Vec<String> = workflow.activity_types.iter().rev().cloned().collect();
        for activity_type in activity_types {
            let forward = self
                .store
                .get_activity_by_type(workflow, &activity_type)
                .await?
                .ok_or_else(|| WorkflowExecutorError::MissingActivity {
                    workflow_id: workflow.id,
                    activity_type: activity_type.clone(),
                })?;

            if forward.state != ActivityState::Succeeded {
                continue;
            }

            let rollback_type = rollback_activity_type(&activity_type);
            let activity = self.activity_executor.create(workflow, &rollback_type).await?;
            self.notify_begin_activity(workflow, &activity).await;
            let result = self.activity_executor.rollback(workflow, activity.clone()).await;
            self.notify_end_activity(workflow, result.as_ref().unwrap_or(&activity)).await;
            let activity = result?;

            match activity.state {
                ActivityState::FailedPermanent => {
                    *workflow = self
                        .store
                        .set_workflow_state(workflow, WorkflowState::FailedRollback)
                        .await?;
                    return Ok(());
                }
                ActivityState::FailedTemporary => {
                    *workflow = self
                        .store
                        .set_workflow_state(workflow, WorkflowState::RunningRetry)
                        .await?;
                    return Ok(());
                }
                ActivityState::Succeeded => continue,
                ActivityState::Pending | ActivityState::Running => {
                    unreachable!("activity executor always returns a terminal-for-pass state")
                }
            }
        }

        *workflow = self
            .store
            .set_workflow_state(workflow, WorkflowState::Failed)
            .await?;
        Ok(())
    }

    async fn retry_scheduler(&self, workflow: &mut Workflow) -> Result<(), WorkflowExecutorError> {
        workflow.execute_at = Some(chrono::Utc::now() + self.config.retry_backoff_chrono());
        *workflow = self.store.update_workflow(workflow).await?;
        *workflow = self
            .store
            .set_workflow_state(workflow, WorkflowState::Queued)
            .await?;
        Ok(())
    }

    async fn notify_begin_workflow(&self, workflow: &Workflow) {
        if let Err(e) = self.notifier.begin_workflow(workflow).await {
            warn!(error = %e, "begin_workflow notifier failed");
        }
    }

    async fn notify_end_workflow(&self, workflow: &Workflow) {
        if let Err(e) = self.notifier.end_workflow(workflow).await {
            warn!(error = %e, "end_workflow notifier failed");
        }
    }

    async fn notify_begin_activity(&self, workflow: &Workflow, activity: &crate::activity::model::Activity) {
        if let Err(e) = self.notifier.begin_activity(workflow, activity).await {
            warn!(error = %e, "begin_activity notifier failed");
        }
    }

    async fn notify_end_activity(&self, workflow: &Workflow, activity: &crate::activity::model::Activity) {
        if let Err(e) = self.notifier.end_activity(workflow, activity).await {
            warn!(error = %e, "end_activity notifier failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::model::Activity;
    use crate::activity::plugin::{ActivityFailure, ActivityPlugin};
    use crate::engine::registry::{Plugin, PluginRegistry};
    use crate::persistence::memory::InMemoryWorkflowStore;
    use crate::workflow::plugin::WorkflowPlugin;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use uuid::Uuid;

    #[derive(Clone, Copy, Debug)]
    enum Outcome {
        Succeed,
        Permanent,
        Temporary,
    }

    struct ScriptedActivity {
        activity_type: &'static str,
        forward: Mutex<Outcome>,
        rollback_outcome: Mutex<Outcome>,
        execute_calls: Mutex<HashMap<String, u32>>,
        rollback_calls: Mutex<HashMap<String, u32>>,
    }

    impl ScriptedActivity {
        fn new(activity_type: &'static str) -> Self {
            Self {
                activity_type,
                forward: Mutex::new(Outcome::Succeed),
                rollback_outcome: Mutex::new(Outcome::Succeed),
                execute_calls: Mutex::new(HashMap::new()),
                rollback_calls: Mutex::new(HashMap::new()),
            }
        }

        fn execute_called(&self) -> u32 {
            *self
                .execute_calls
                .lock()
                .get(self.activity_type)
                .unwrap_or(&0)
        }

        fn rollback_called(&self) -> u32 {
            *self
                .rollback_calls
                .lock()
                .get(self.activity_type)
                .unwrap_or(&0)
        }
    }

    impl Plugin for ScriptedActivity {
        fn plugin_type(&self) -> &str {
            self.activity_type
        }
    }

    #[async_trait]
    impl ActivityPlugin for ScriptedActivity {
        async fn execute(&self, _: &Workflow, _: &Activity) -> Result<(), ActivityFailure> {
            *self
                .execute_calls
                .lock()
                .entry(self.activity_type.to_string())
                .or_insert(0) += 1;
            match *self.forward.lock() {
                Outcome::Succeed => Ok(()),
                Outcome::Permanent => Err(ActivityFailure::Permanent("boom".into())),
                Outcome::Temporary => Err(ActivityFailure::Temporary("flaky".into())),
            }
        }

        async fn rollback(&self, _: &Workflow, _: &Activity) -> Result<(), ActivityFailure> {
            *self
                .rollback_calls
                .lock()
                .entry(self.activity_type.to_string())
                .or_insert(0) += 1;
            match *self.rollback_outcome.lock() {
                Outcome::Succeed => Ok(()),
                Outcome::Permanent => Err(ActivityFailure::Permanent("boom".into())),
                Outcome::Temporary => Err(ActivityFailure::Temporary("flaky".into())),
            }
        }
    }

    struct ScriptedWorkflow {
        plan: Vec<String>,
    }

    impl Plugin for ScriptedWorkflow {
        fn plugin_type(&self) -> &str {
            "checkout"
        }
    }

    #[async_trait]
    impl WorkflowPlugin for ScriptedWorkflow {
        async fn plan(&self, _: &Workflow) -> Vec<String> {
            self.plan.clone()
        }
    }

    struct Harness {
        store: Arc<InMemoryWorkflowStore>,
        executor: WorkflowExecutor<InMemoryWorkflowStore>,
        activities: HashMap<&'static str, Arc<ScriptedActivity>>,
    }

    async fn harness(plan: Vec<&'static str>) -> (Harness, Workflow) {
        let store = Arc::new(InMemoryWorkflowStore::default());
        let workflow_plugins = Arc::new(PluginRegistry::new());
        let activity_plugins: Arc<ActivityPluginRegistry> = Arc::new(PluginRegistry::new());

        let mut activities = HashMap::new();
        for activity_type in &plan {
            let activity = Arc::new(ScriptedActivity::new(activity_type));
            activity_plugins.register(activity.clone());
            activities.insert(*activity_type, activity);
        }

        workflow_plugins.register(Arc::new(ScriptedWorkflow {
            plan: plan.iter().map(|s| s.to_string()).collect(),
        }));

        let mut config = EngineConfig::default();
        config.retry_backoff = std::time::Duration::from_secs(10);

        let executor = WorkflowExecutor::new(store.clone(), workflow_plugins, activity_plugins)
            .with_config(config);

        let workflow = executor
            .create(CreateWorkflowInput::new(Uuid::new_v4(), "checkout"))
            .await
            .unwrap();

        (
            Harness {
                store,
                executor,
                activities,
            },
            workflow,
        )
    }

    #[tokio::test]
    async fn scenario_1_empty_plan_fails() {
        let (h, workflow) = harness(vec![]).await;
        let workflow = h.executor.execute(workflow).await.unwrap();
        assert_eq!(workflow.state, WorkflowState::Failed);
    }

    #[tokio::test]
    async fn scenario_2_single_activity_succeeds() {
        let (h, workflow) = harness(vec!["a"]).await;
        let workflow = h.executor.execute(workflow).await.unwrap();
        assert_eq!(workflow.state, WorkflowState::Succeeded);
        assert_eq!(h.activities["a"].execute_called(), 1);
    }

    #[tokio::test]
    async fn scenario_3_two_activities_in_order() {
        let (h, workflow) = harness(vec!["a", "b"]).await;
        let workflow = h.executor.execute(workflow).await.unwrap();
        assert_eq!(workflow.state, WorkflowState::Succeeded);
        assert_eq!(h.activities["a"].execute_called(), 1);
        assert_eq!(h.activities["b"].execute_called(), 1);
    }

    #[tokio::test]
    async fn scenario_4_temporary_failure_requeues() {
        let (h, workflow) = harness(vec!["a"]).await;
        *h.activities["a"].forward.lock() = Outcome::Temporary;
        let before = chrono::Utc::now();
        let workflow = h.executor.execute(workflow).await.unwrap();
        assert_eq!(workflow.state, WorkflowState::Queued);
        let execute_at = workflow.execute_at.expect("execute_at set");
        assert!(execute_at >= before + chrono::Duration::seconds(9));
        assert_eq!(h.activities["a"].execute_called(), 1);
        assert_eq!(h.activities["a"].rollback_called(), 0);
    }

    #[tokio::test]
    async fn scenario_5_permanent_failure_single_activity() {
        let (h, workflow) = harness(vec!["a"]).await;
        *h.activities["a"].forward.lock() = Outcome::Permanent;
        let workflow = h.executor.execute(workflow).await.unwrap();
        assert_eq!(workflow.state, WorkflowState::Failed);
        assert_eq!(h.activities["a"].rollback_called(), 0);
    }

    #[tokio::test]
    async fn scenario_6_permanent_failure_rolls_back_first() {
        let (h, workflow) = harness(vec!["a", "b"]).await;
        *h.activities["b"].forward.lock() = Outcome::Permanent;
        let workflow = h.executor.execute(workflow).await.unwrap();
        assert_eq!(workflow.state, WorkflowState::Failed);
        assert_eq!(h.activities["a"].rollback_called(), 1);
        assert_eq!(h.activities["b"].rollback_called(), 0);
    }

    #[tokio::test]
    async fn scenario_7_rollback_temporary_failure_requeues() {
        let (h, workflow) = harness(vec!["a", "b"]).await;
        *h.activities["b"].forward.lock() = Outcome::Permanent;
        *h.activities["a"].rollback_outcome.lock() = Outcome::Temporary;
        let workflow = h.executor.execute(workflow).await.unwrap();
        assert_eq!(workflow.state, WorkflowState::Queued);
    }

    #[tokio::test]
    async fn scenario_8_rollback_permanent_failure() {
        let (h, workflow) = harness(vec!["a", "b"]).await;
        *h.activities["b"].forward.lock() = Outcome::Permanent;
        *h.activities["a"].rollback_outcome.lock() = Outcome::Permanent;
        let workflow = h.executor.execute(workflow).await.unwrap();
        assert_eq!(workflow.state, WorkflowState::FailedRollback);
    }

    #[tokio::test]
    async fn scenario_9_retry_skips_already_succeeded_activities() {
        let (h, workflow) = harness(vec!["a", "b"]).await;
        *h.activities["b"].forward.lock() = Outcome::Temporary;
        let workflow = h.executor.execute(workflow).await.unwrap();
        assert_eq!(workflow.state, WorkflowState::Queued);
        assert_eq!(h.activities["a"].execute_called(), 1);
        assert_eq!(h.activities["b"].execute_called(), 1);

        // simulate the queue re-admitting the requeued workflow
        let workflow = h
            .store
            .set_workflow_state(&workflow, WorkflowState::Pending)
            .await
            .unwrap();
        *h.activities["b"].forward.lock() = Outcome::Succeed;
        let workflow = h.executor.execute(workflow).await.unwrap();

        assert_eq!(workflow.state, WorkflowState::Succeeded);
        assert_eq!(h.activities["a"].execute_called(), 1);
        assert_eq!(h.activities["b"].execute_called(), 2);
    }
}
