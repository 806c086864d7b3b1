//! PostgreSQL implementation of `WorkflowStore`.
//!
//! - Atomic work admission via `SELECT ... FOR UPDATE SKIP LOCKED` wrapped
//!   in an `UPDATE ... FROM` so concurrent pollers never take the same row.
//! - Locking via a plain `INSERT` into `workflow_locks`; a primary-key
//!   conflict is translated into `AlreadyLocked`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::activity::model::{Activity, ActivityState};
use crate::persistence::store::{StoreError, WorkflowStore};
use crate::workflow::model::{CreateWorkflowInput, Workflow, WorkflowState};

/// Embedded migrations for the `workflows` / `activities` / `workflow_locks`
/// schema, so the crate is self-contained for integration testing against a
/// real Postgres instance.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
    lock_ttl: chrono::Duration,
}

impl PostgresWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_ttl: chrono::Duration::minutes(15),
        }
    }

    pub fn with_lock_ttl(mut self, lock_ttl: chrono::Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(&self.pool).await
    }
}

fn row_to_workflow(row: &sqlx::postgres::PgRow) -> Workflow {
    Workflow {
        id: row.get("id"),
        workflow_type: row.get("type"),
        state: row.get("state"),
        ref_type: row.get("ref_type"),
        ref_id: row.get("ref_id"),
        activity_types: row.get("activity_types"),
        attempts: row.get::<i32, _>("attempts") as u32,
        execute_at: row.get("execute_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_activity(row: &sqlx::postgres::PgRow) -> Activity {
    Activity {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        activity_type: row.get("type"),
        state: row.get("state"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    #[instrument(skip(self))]
    async fn get_workflow_by_id(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query(r#"SELECT * FROM workflows WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "get_workflow_by_id failed");
                StoreError::Database(e.to_string())
            })?;
        Ok(row.as_ref().map(row_to_workflow))
    }

    #[instrument(skip(self))]
    async fn get_workflow_by_ref_id(&self, ref_id: &str) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query(r#"SELECT * FROM workflows WHERE ref_id = $1"#)
            .bind(ref_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "get_workflow_by_ref_id failed");
                StoreError::Database(e.to_string())
            })?;
        Ok(row.as_ref().map(row_to_workflow))
    }

    #[instrument(skip(self))]
    async fn get_executable_workflows(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM workflows
                WHERE state = 'queued'
                  AND execute_at <= $1
                ORDER BY execute_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE workflows w
            SET state = 'pending',
                updated_at = NOW()
            FROM claimable c
            WHERE w.id = c.id
            RETURNING w.*
            "#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "get_executable_workflows failed");
            StoreError::Database(e.to_string())
        })?;
        Ok(rows.iter().map(row_to_workflow).collect())
    }

    #[instrument(skip(self))]
    async fn get_lost_workflows(
        &self,
        limit: usize,
        lookback: chrono::Duration,
        cutoff: chrono::Duration,
    ) -> Result<Vec<Workflow>, StoreError> {
        let now = Utc::now();
        let window_start = now - cutoff;
        let window_end = now - lookback;
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflows
            WHERE state IN ('pending', 'running', 'running_retry', 'running_rollback')
              AND created_at >= $1
              AND created_at <= $2
              AND (execute_at IS NULL OR execute_at < $2)
            ORDER BY created_at
            LIMIT $3
            "#,
        )
        .bind(window_start)
        .bind(window_end)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "get_lost_workflows failed");
            StoreError::Database(e.to_string())
        })?;
        Ok(rows.iter().map(row_to_workflow).collect())
    }

    #[instrument(skip(self, input))]
    async fn create_workflow(&self, input: CreateWorkflowInput) -> Result<Workflow, StoreError> {
        let state = if input.execute_at.is_some() {
            WorkflowState::Queued
        } else {
            WorkflowState::Pending
        };
        let row = sqlx::query(
            r#"
            INSERT INTO workflows (id, type, state, ref_type, ref_id, activity_types, attempts, execute_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, ARRAY[]::text[], 0, $6, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(input.id)
        .bind(&input.workflow_type)
        .bind(state)
        .bind(&input.ref_type)
        .bind(&input.ref_id)
        .bind(input.execute_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "create_workflow failed");
            StoreError::Database(e.to_string())
        })?;
        Ok(row_to_workflow(&row))
    }

    #[instrument(skip(self, workflow))]
    async fn set_workflow_state(
        &self,
        workflow: &Workflow,
        state: WorkflowState,
    ) -> Result<Workflow, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE workflows
            SET state = $2,
                attempts = attempts + CASE WHEN $2 = 'running' THEN 1 ELSE 0 END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(workflow.id)
        .bind(state)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "set_workflow_state failed");
            StoreError::Database(e.to_string())
        })?
        .ok_or(StoreError::WorkflowNotFound(workflow.id))?;
        Ok(row_to_workflow(&row))
    }

    #[instrument(skip(self, workflow))]
    async fn update_workflow(&self, workflow: &Workflow) -> Result<Workflow, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE workflows
            SET ref_type = $2,
                ref_id = $3,
                activity_types = $4,
                execute_at = $5,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.ref_type)
        .bind(&workflow.ref_id)
        .bind(&workflow.activity_types)
        .bind(workflow.execute_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "update_workflow failed");
            StoreError::Database(e.to_string())
        })?
        .ok_or(StoreError::WorkflowNotFound(workflow.id))?;
        Ok(row_to_workflow(&row))
    }

    #[instrument(skip(self, workflow))]
    async fn lock_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let expire_at = Utc::now() + self.lock_ttl;
        let result = sqlx::query(
            r#"INSERT INTO workflow_locks (id, expire_at, created_at) VALUES ($1, $2, NOW())"#,
        )
        .bind(workflow.id)
        .bind(expire_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                debug!(workflow_id = %workflow.id, "workflow already locked");
                Err(StoreError::AlreadyLocked {
                    workflow_type: workflow.workflow_type.clone(),
                    workflow_id: workflow.id,
                })
            }
            Err(e) => {
                error!(error = %e, "lock_workflow failed");
                Err(StoreError::Database(e.to_string()))
            }
        }
    }

    #[instrument(skip(self, workflow))]
    async fn try_lock_workflow(&self, workflow: &Workflow) -> Result<bool, StoreError> {
        match self.lock_workflow(workflow).await {
            Ok(()) => Ok(true),
            Err(StoreError::AlreadyLocked { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, workflow))]
    async fn unlock_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        sqlx::query(r#"DELETE FROM workflow_locks WHERE id = $1"#)
            .bind(workflow.id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "unlock_workflow failed");
                StoreError::Database(e.to_string())
            })?;
        Ok(())
    }

    #[instrument(skip(self, workflow))]
    async fn get_activity_by_type(
        &self,
        workflow: &Workflow,
        activity_type: &str,
    ) -> Result<Option<Activity>, StoreError> {
        let row = sqlx::query(r#"SELECT * FROM activities WHERE workflow_id = $1 AND type = $2"#)
            .bind(workflow.id)
            .bind(activity_type)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "get_activity_by_type failed");
                StoreError::Database(e.to_string())
            })?;
        Ok(row.as_ref().map(row_to_activity))
    }

    #[instrument(skip(self, workflow))]
    async fn create_activity(
        &self,
        workflow: &Workflow,
        id: Uuid,
        activity_type: &str,
    ) -> Result<Activity, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO activities (id, workflow_id, type, state, created_at, updated_at)
            SELECT $1, w.id, $3, $4, NOW(), NOW()
            FROM workflows w WHERE w.id = $2
            RETURNING id, workflow_id, type, state, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(workflow.id)
        .bind(activity_type)
        .bind(ActivityState::Pending)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "create_activity failed");
            StoreError::Database(e.to_string())
        })?
        .ok_or(StoreError::WorkflowNotFound(workflow.id))?;
        Ok(row_to_activity(&row))
    }

    #[instrument(skip(self, activity))]
    async fn update_activity(&self, activity: &Activity) -> Result<Activity, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE activities
            SET state = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(activity.id)
        .bind(activity.state)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "update_activity failed");
            StoreError::Database(e.to_string())
        })?
        .ok_or(StoreError::ActivityNotFound(activity.id))?;
        Ok(row_to_activity(&row))
    }
}

