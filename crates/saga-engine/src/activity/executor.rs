use std::sync::Arc;

use tracing::instrument;

use crate::activity::model::{deterministic_activity_id, normalize_activity_type, Activity, ActivityState};
use crate::activity::plugin::ActivityFailure;
use crate::engine::registry::ActivityPluginRegistry;
use crate::persistence::store::{StoreError, WorkflowStore};
use crate::workflow::model::Workflow;

#[derive(Debug, thiserror::Error)]
pub enum ActivityExecutorError {
    #[error("unknown activity plugin: {0}")]
    UnknownActivityPlugin(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives a single activity through its sub-state-machine within a single
/// invocation. One instance is shared across every activity dispatched by
/// a `WorkflowExecutor`.
pub struct ActivityExecutor<S: WorkflowStore> {
    store: Arc<S>,
    plugins: Arc<ActivityPluginRegistry>,
}

impl<S: WorkflowStore> ActivityExecutor<S> {
    pub fn new(store: Arc<S>, plugins: Arc<ActivityPluginRegistry>) -> Self {
        Self { store, plugins }
    }

    /// Looks up an existing activity by `(workflow, activity_type)`; if
    /// absent, computes the deterministic ID and inserts. Safe to call
    /// repeatedly.
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id, activity_type))]
    pub async fn create(
        &self,
        workflow: &Workflow,
        activity_type: &str,
    ) -> Result<Activity, ActivityExecutorError> {
        if let Some(existing) = self
            .store
            .get_activity_by_type(workflow, activity_type)
            .await?
        {
            return Ok(existing);
        }
        let id = deterministic_activity_id(workflow.id, activity_type);
        Ok(self.store.create_activity(workflow, id, activity_type).await?)
    }

    pub async fn execute(
        &self,
        workflow: &Workflow,
        activity: Activity,
    ) -> Result<Activity, ActivityExecutorError> {
        self.run(workflow, activity, false).await
    }

    pub async fn rollback(
        &self,
        workflow: &Workflow,
        activity: Activity,
    ) -> Result<Activity, ActivityExecutorError> {
        self.run(workflow, activity, true).await
    }

    #[instrument(skip(self, workflow, activity), fields(workflow_id = %workflow.id, activity_id = %activity.id, activity_type = %activity.activity_type, is_rollback))]
    async fn run(
        &self,
        workflow: &Workflow,
        mut activity: Activity,
        is_rollback: bool,
    ) -> Result<Activity, ActivityExecutorError> {
        let normalized = normalize_activity_type(&activity.activity_type);
        let plugin = self
            .plugins
            .lookup(normalized)
            .ok_or_else(|| ActivityExecutorError::UnknownActivityPlugin(normalized.to_string()))?;

        if !activity.state.is_terminal() {
            activity.state = ActivityState::Pending;
            activity = self.store.update_activity(&activity).await?;
        }

        loop {
            match activity.state {
                ActivityState::Pending => {
                    activity.state = ActivityState::Running;
                    activity = self.store.update_activity(&activity).await?;
                }
                ActivityState::Running => {
                    let outcome = if is_rollback {
                        plugin.rollback(workflow, &activity).await
                    } else {
                        plugin.execute(workflow, &activity).await
                    };
                    activity.state = match outcome {
                        Ok(()) => ActivityState::Succeeded,
                        Err(ActivityFailure::Permanent(reason)) => {
                            tracing::warn!(reason, "activity failed permanently");
                            ActivityState::FailedPermanent
                        }
                        Err(ActivityFailure::Temporary(reason)) => {
                            tracing::warn!(reason, "activity failed temporarily");
                            ActivityState::FailedTemporary
                        }
                    };
                    activity = self.store.update_activity(&activity).await?;
                    return Ok(activity);
                }
                ActivityState::Succeeded | ActivityState::FailedPermanent => return Ok(activity),
                ActivityState::FailedTemporary => return Ok(activity),
            }
        }
    }
}
