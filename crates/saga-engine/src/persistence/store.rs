use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::activity::model::Activity;
use crate::workflow::model::{CreateWorkflowInput, Workflow, WorkflowState};

#[derive(Debug, Clone)]
pub struct WorkflowLock {
    pub id: Uuid,
    pub expire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("activity not found: {0}")]
    ActivityNotFound(Uuid),

    #[error("workflow {workflow_type} already locked ({workflow_id})")]
    AlreadyLocked {
        workflow_type: String,
        workflow_id: Uuid,
    },

    #[error("database error: {0}")]
    Database(String),
}

/// Persistent repository of workflows, activities, and per-workflow locks.
///
/// The in-memory and Postgres implementations must be observationally
/// equivalent for every method here.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    async fn get_workflow_by_id(&self, id: Uuid) -> Result<Option<Workflow>, StoreError>;

    async fn get_workflow_by_ref_id(&self, ref_id: &str) -> Result<Option<Workflow>, StoreError>;

    /// Up to `limit` workflows where `state = queued` and `execute_at <=
    /// cutoff`, atomically transitioned to `pending`. Implementations must
    /// guarantee that concurrent callers never observe the same row.
    async fn get_executable_workflows(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Workflow>, StoreError>;

    /// Up to `limit` non-terminal in-flight workflows (`pending`,
    /// `running`, `running_retry`, `running_rollback`) whose `created_at`
    /// falls in `[now - cutoff, now - lookback]` and whose `execute_at` is
    /// before `now - lookback` (or absent).
    async fn get_lost_workflows(
        &self,
        limit: usize,
        lookback: chrono::Duration,
        cutoff: chrono::Duration,
    ) -> Result<Vec<Workflow>, StoreError>;

    async fn create_workflow(&self, input: CreateWorkflowInput) -> Result<Workflow, StoreError>;

    /// Persists the new state. If the new state is `running`, increments
    /// `attempts` by 1. Always refreshes `updated_at`.
    async fn set_workflow_state(
        &self,
        workflow: &Workflow,
        state: WorkflowState,
    ) -> Result<Workflow, StoreError>;

    /// Persists the current field values (other than `state`/`attempts`,
    /// which only change via `set_workflow_state`). Refreshes `updated_at`.
    async fn update_workflow(&self, workflow: &Workflow) -> Result<Workflow, StoreError>;

    /// Acquires the workflow's lock. Fails with `AlreadyLocked` if already
    /// held.
    async fn lock_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// True iff the lock was freshly acquired. Never fails on contention.
    async fn try_lock_workflow(&self, workflow: &Workflow) -> Result<bool, StoreError>;

    /// Releases the lock. Idempotent.
    async fn unlock_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn get_activity_by_type(
        &self,
        workflow: &Workflow,
        activity_type: &str,
    ) -> Result<Option<Activity>, StoreError>;

    /// Inserts a new activity with state `pending`. Fails if the parent
    /// workflow is absent.
    async fn create_activity(
        &self,
        workflow: &Workflow,
        id: Uuid,
        activity_type: &str,
    ) -> Result<Activity, StoreError>;

    async fn update_activity(&self, activity: &Activity) -> Result<Activity, StoreError>;
}
