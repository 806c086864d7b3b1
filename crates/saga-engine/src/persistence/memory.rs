//! In-memory `WorkflowStore`. A reference/testing implementation of the
//! store contract, not a mock — it implements full lock semantics and the
//! lookback/cutoff windowing for `get_lost_workflows`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::activity::model::Activity;
use crate::persistence::store::{StoreError, WorkflowLock, WorkflowStore};
use crate::workflow::model::{CreateWorkflowInput, Workflow, WorkflowState};

#[derive(Default)]
struct State {
    workflows: HashMap<Uuid, Workflow>,
    activities: HashMap<Uuid, Activity>,
    locks: HashMap<Uuid, WorkflowLock>,
}

pub struct InMemoryWorkflowStore {
    state: RwLock<State>,
    lock_ttl: chrono::Duration,
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new(chrono::Duration::minutes(15))
    }
}

impl InMemoryWorkflowStore {
    pub fn new(lock_ttl: chrono::Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            lock_ttl,
        }
    }

    pub fn workflow_count(&self) -> usize {
        self.state.read().workflows.len()
    }

    pub fn activity_count(&self) -> usize {
        self.state.read().activities.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.workflows.clear();
        state.activities.clear();
        state.locks.clear();
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get_workflow_by_id(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        Ok(self.state.read().workflows.get(&id).cloned())
    }

    async fn get_workflow_by_ref_id(&self, ref_id: &str) -> Result<Option<Workflow>, StoreError> {
        Ok(self
            .state
            .read()
            .workflows
            .values()
            .find(|w| w.ref_id.as_deref() == Some(ref_id))
            .cloned())
    }

    async fn get_executable_workflows(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Workflow>, StoreError> {
        let mut state = self.state.write();
        let mut due: Vec<Uuid> = state
            .workflows
            .values()
            .filter(|w| {
                w.state == WorkflowState::Queued
                    && w.execute_at.map(|t| t <= cutoff).unwrap_or(false)
            })
            .map(|w| w.id)
            .collect();
        due.sort_by_key(|id| state.workflows[id].execute_at);
        due.truncate(limit);

        let now = Utc::now();
        let mut out = Vec::with_capacity(due.len());
        for id in due {
            let workflow = state.workflows.get_mut(&id).expect("selected above");
            workflow.state = WorkflowState::Pending;
            workflow.updated_at = now;
            out.push(workflow.clone());
        }
        Ok(out)
    }

    async fn get_lost_workflows(
        &self,
        limit: usize,
        lookback: chrono::Duration,
        cutoff: chrono::Duration,
    ) -> Result<Vec<Workflow>, StoreError> {
        let now = Utc::now();
        let window_start = now - cutoff;
        let window_end = now - lookback;
        let state = self.state.read();
        let mut lost: Vec<Workflow> = state
            .workflows
            .values()
            .filter(|w| {
                matches!(
                    w.state,
                    WorkflowState::Pending
                        | WorkflowState::Running
                        | WorkflowState::RunningRetry
                        | WorkflowState::RunningRollback
                ) && w.created_at >= window_start
                    && w.created_at <= window_end
                    && w.execute_at.map(|t| t < window_end).unwrap_or(true)
            })
            .cloned()
            .collect();
        lost.sort_by_key(|w| w.created_at);
        lost.truncate(limit);
        Ok(lost)
    }

    async fn create_workflow(&self, input: CreateWorkflowInput) -> Result<Workflow, StoreError> {
        let now = Utc::now();
        let state_value = if input.execute_at.is_some() {
            WorkflowState::Queued
        } else {
            WorkflowState::Pending
        };
        let workflow = Workflow {
            id: input.id,
            workflow_type: input.workflow_type,
            state: state_value,
            ref_type: input.ref_type,
            ref_id: input.ref_id,
            activity_types: Vec::new(),
            attempts: 0,
            execute_at: input.execute_at,
            created_at: now,
            updated_at: now,
        };
        self.state
            .write()
            .workflows
            .insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn set_workflow_state(
        &self,
        workflow: &Workflow,
        new_state: WorkflowState,
    ) -> Result<Workflow, StoreError> {
        let mut state = self.state.write();
        let stored = state
            .workflows
            .get_mut(&workflow.id)
            .ok_or(StoreError::WorkflowNotFound(workflow.id))?;
        stored.state = new_state;
        if new_state == WorkflowState::Running {
            stored.attempts += 1;
        }
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<Workflow, StoreError> {
        let mut state = self.state.write();
        let stored = state
            .workflows
            .get_mut(&workflow.id)
            .ok_or(StoreError::WorkflowNotFound(workflow.id))?;
        stored.ref_type = workflow.ref_type.clone();
        stored.ref_id = workflow.ref_id.clone();
        stored.activity_types = workflow.activity_types.clone();
        stored.execute_at = workflow.execute_at;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn lock_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.locks.contains_key(&workflow.id) {
            return Err(StoreError::AlreadyLocked {
                workflow_type: workflow.workflow_type.clone(),
                workflow_id: workflow.id,
            });
        }
        let now = Utc::now();
        state.locks.insert(
            workflow.id,
            WorkflowLock {
                id: workflow.id,
                expire_at: now + self.lock_ttl,
                created_at: now,
            },
        );
        Ok(())
    }

    async fn try_lock_workflow(&self, workflow: &Workflow) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        if state.locks.contains_key(&workflow.id) {
            return Ok(false);
        }
        let now = Utc::now();
        state.locks.insert(
            workflow.id,
            WorkflowLock {
                id: workflow.id,
                expire_at: now + self.lock_ttl,
                created_at: now,
            },
        );
        Ok(true)
    }

    async fn unlock_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.state.write().locks.remove(&workflow.id);
        Ok(())
    }

    async fn get_activity_by_type(
        &self,
        workflow: &Workflow,
        activity_type: &str,
    ) -> Result<Option<Activity>, StoreError> {
        Ok(self
            .state
            .read()
            .activities
            .values()
            .find(|a| a.workflow_id == workflow.id && a.activity_type == activity_type)
            .cloned())
    }

    async fn create_activity(
        &self,
        workflow: &Workflow,
        id: Uuid,
        activity_type: &str,
    ) -> Result<Activity, StoreError> {
        let mut state = self.state.write();
        if !state.workflows.contains_key(&workflow.id) {
            return Err(StoreError::WorkflowNotFound(workflow.id));
        }
        let now = Utc::now();
        let activity = Activity {
            id,
            workflow_id: workflow.id,
            activity_type: activity_type.to_string(),
            state: crate::activity::model::ActivityState::Pending,
            created_at: now,
            updated_at: now,
        };
        state.activities.insert(id, activity.clone());
        Ok(activity)
    }

    async fn update_activity(&self, activity: &Activity) -> Result<Activity, StoreError> {
        let mut state = self.state.write();
        let stored = state
            .activities
            .get_mut(&activity.id)
            .ok_or(StoreError::ActivityNotFound(activity.id))?;
        stored.state = activity.state;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }
}
