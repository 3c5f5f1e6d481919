//! Postgres task and workspace repositories

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowmail_core::models::{Task, TaskFilter, Workspace};
use flowmail_core::repository::{TaskRepository, WorkspaceRepository};
use flowmail_core::types::{TaskId, WorkspaceId};
use sqlx::PgPool;

/// Workspace directory backed by the shared pool. Every workspace maps onto
/// the same database, scoped by `workspace_id` columns.
#[derive(Clone)]
pub struct PgWorkspaceRepository {
    pool: PgPool,
}

impl PgWorkspaceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkspaceRepository for PgWorkspaceRepository {
    async fn list(&self) -> Result<Vec<Workspace>> {
        let workspaces =
            sqlx::query_as::<_, Workspace>("SELECT * FROM workspaces ORDER BY created_at")
                .fetch_all(&self.pool)
                .await
                .context("failed to list workspaces")?;
        Ok(workspaces)
    }

    async fn db_pool(&self, _workspace_id: &WorkspaceId) -> Result<PgPool> {
        Ok(self.pool.clone())
    }
}

/// Durable task store in Postgres
#[derive(Clone)]
pub struct PgTaskRepository {
    pool: PgPool,
}

impl PgTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn create(&self, task: &Task) -> Result<()> {
        task.validate()?;
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, workspace_id, kind, status, progress, state, message,
                 max_runtime_seconds, max_retries, retry_count, retry_interval_seconds,
                 next_run_after, last_error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(task.id)
        .bind(task.workspace_id)
        .bind(&task.kind)
        .bind(task.status)
        .bind(task.progress)
        .bind(&task.state)
        .bind(&task.message)
        .bind(task.max_runtime_seconds)
        .bind(task.max_retries)
        .bind(task.retry_count)
        .bind(task.retry_interval_seconds)
        .bind(task.next_run_after)
        .bind(&task.last_error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .context("failed to insert task")?;
        Ok(())
    }

    async fn get(&self, workspace_id: &WorkspaceId, id: &TaskId) -> Result<Option<Task>> {
        let task =
            sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE workspace_id = $1 AND id = $2")
                .bind(workspace_id)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("failed to load task")?;
        Ok(task)
    }

    async fn update(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = $3,
                progress = $4,
                state = $5,
                message = $6,
                retry_count = $7,
                next_run_after = $8,
                last_error = $9,
                updated_at = $10
            WHERE workspace_id = $1 AND id = $2
            "#,
        )
        .bind(task.workspace_id)
        .bind(task.id)
        .bind(task.status)
        .bind(task.progress)
        .bind(&task.state)
        .bind(&task.message)
        .bind(task.retry_count)
        .bind(task.next_run_after)
        .bind(&task.last_error)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .context("failed to update task")?;
        Ok(())
    }

    async fn save_state(
        &self,
        workspace_id: &WorkspaceId,
        id: &TaskId,
        progress: f64,
        state: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET progress = $3, state = $4, updated_at = NOW()
            WHERE workspace_id = $1 AND id = $2
            "#,
        )
        .bind(workspace_id)
        .bind(id)
        .bind(progress)
        .bind(state)
        .execute(&self.pool)
        .await
        .context("failed to checkpoint task state")?;
        Ok(())
    }

    async fn list(&self, workspace_id: &WorkspaceId, filter: &TaskFilter) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE workspace_id = $1
              AND ($2::task_status IS NULL OR status = $2)
              AND ($3::text IS NULL OR kind = $3)
            ORDER BY created_at DESC
            "#,
        )
        .bind(workspace_id)
        .bind(filter.status)
        .bind(&filter.kind)
        .fetch_all(&self.pool)
        .await
        .context("failed to list tasks")?;
        Ok(tasks)
    }

    async fn claim_due(
        &self,
        workspace_id: &WorkspaceId,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        // claim-and-mark in one statement; concurrent runners skip each
        // other's rows
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET status = 'running', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM tasks
                WHERE workspace_id = $1
                  AND status = 'pending'
                  AND (next_run_after IS NULL OR next_run_after <= $2)
                ORDER BY next_run_after NULLS FIRST
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(workspace_id)
        .bind(now)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await
        .context("failed to claim due tasks")?;
        Ok(tasks)
    }

    async fn find_by_kind(&self, workspace_id: &WorkspaceId, kind: &str) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE workspace_id = $1 AND kind = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(workspace_id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await
        .context("failed to find task by kind")?;
        Ok(task)
    }
}
