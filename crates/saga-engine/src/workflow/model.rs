use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A workflow's position in its state machine.
///
/// `queued` is the eligible-for-pickup state; `pending` is the in-executor
/// "just admitted" state; `running_retry` is transient and collapses back
/// to `queued` with a future `execute_at` before the executor returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "workflow_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Queued,
    Pending,
    Running,
    RunningRetry,
    RunningRollback,
    Failed,
    FailedRollback,
    Succeeded,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Failed | WorkflowState::FailedRollback | WorkflowState::Succeeded
        )
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowState::Queued => "queued",
            WorkflowState::Pending => "pending",
            WorkflowState::Running => "running",
            WorkflowState::RunningRetry => "running_retry",
            WorkflowState::RunningRollback => "running_rollback",
            WorkflowState::Failed => "failed",
            WorkflowState::FailedRollback => "failed_rollback",
            WorkflowState::Succeeded => "succeeded",
        };
        f.write_str(s)
    }
}

/// A linear sequence of activities, planned once and driven to a terminal
/// state by the workflow executor.
///
/// `workflow_type` is colon-prefixed: the substring before the first `:`
/// selects the workflow plugin, the rest is opaque metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub workflow_type: String,
    pub state: WorkflowState,
    pub ref_type: Option<String>,
    pub ref_id: Option<String>,
    pub activity_types: Vec<String>,
    pub attempts: u32,
    pub execute_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// The plugin type this workflow's `workflow_type` resolves to: the
    /// substring before the first `:`.
    pub fn plugin_type(&self) -> &str {
        self.workflow_type
            .split(':')
            .next()
            .unwrap_or(&self.workflow_type)
    }
}

/// Input to `create_workflow`. Initial state is `queued` iff `execute_at`
/// is supplied, else `pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowInput {
    pub id: Uuid,
    pub workflow_type: String,
    pub ref_type: Option<String>,
    pub ref_id: Option<String>,
    pub execute_at: Option<DateTime<Utc>>,
}

impl CreateWorkflowInput {
    pub fn new(id: Uuid, workflow_type: impl Into<String>) -> Self {
        Self {
            id,
            workflow_type: workflow_type.into(),
            ref_type: None,
            ref_id: None,
            execute_at: None,
        }
    }

    pub fn with_ref(mut self, ref_type: impl Into<String>, ref_id: impl Into<String>) -> Self {
        self.ref_type = Some(ref_type.into());
        self.ref_id = Some(ref_id.into());
        self
    }

    pub fn with_execute_at(mut self, execute_at: DateTime<Utc>) -> Self {
        self.execute_at = Some(execute_at);
        self
    }
}
