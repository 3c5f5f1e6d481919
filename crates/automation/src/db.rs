//! Postgres repositories for the automation side

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowmail_core::models::{
    Automation, AutomationStat, ContactAutomation, NodeExecution, OutboundMessage, TimelineEntry,
};
use flowmail_core::repository::{
    AutomationRepository, AutomationStatsRepository, ContactAutomationRepository,
    ContactListRepository, EmailQueue, NodeExecutionRepository, TimelineRepository,
};
use flowmail_core::types::{AutomationId, ContactAutomationId, ListId, WorkspaceId};
use sqlx::PgPool;

/// Automation definitions in Postgres
#[derive(Clone)]
pub struct PgAutomationRepository {
    pool: PgPool,
}

impl PgAutomationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AutomationRepository for PgAutomationRepository {
    async fn get(
        &self,
        workspace_id: &WorkspaceId,
        id: &AutomationId,
    ) -> Result<Option<Automation>> {
        let automation = sqlx::query_as::<_, Automation>(
            "SELECT * FROM automations WHERE workspace_id = $1 AND id = $2",
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load automation")?;
        Ok(automation)
    }
}

/// Contact automation cursors in Postgres
#[derive(Clone)]
pub struct PgContactAutomationRepository {
    pool: PgPool,
}

impl PgContactAutomationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactAutomationRepository for PgContactAutomationRepository {
    async fn get(
        &self,
        workspace_id: &WorkspaceId,
        id: &ContactAutomationId,
    ) -> Result<Option<ContactAutomation>> {
        let cursor = sqlx::query_as::<_, ContactAutomation>(
            "SELECT * FROM contact_automations WHERE workspace_id = $1 AND id = $2",
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load contact automation")?;
        Ok(cursor)
    }

    async fn claim_due(
        &self,
        workspace_id: &WorkspaceId,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContactAutomation>> {
        // push the wake time forward as a lease so a crashed worker's claim
        // becomes visible again after a minute
        let cursors = sqlx::query_as::<_, ContactAutomation>(
            r#"
            UPDATE contact_automations
            SET scheduled_at = $3 + INTERVAL '1 minute'
            WHERE id IN (
                SELECT id FROM contact_automations
                WHERE workspace_id = $1
                  AND status = 'active'
                  AND (scheduled_at IS NULL OR scheduled_at <= $3)
                ORDER BY scheduled_at NULLS FIRST
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(workspace_id)
        .bind(batch_size)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("failed to claim due contact automations")?;
        Ok(cursors)
    }

    async fn update(&self, cursor: &ContactAutomation) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE contact_automations
            SET current_node_id = $3,
                status = $4,
                scheduled_at = $5,
                exit_reason = $6,
                retry_count = $7,
                max_retries = $8,
                last_error = $9,
                last_retry_at = $10,
                updated_at = $11
            WHERE workspace_id = $1 AND id = $2
            "#,
        )
        .bind(cursor.workspace_id)
        .bind(cursor.id)
        .bind(&cursor.current_node_id)
        .bind(cursor.status)
        .bind(cursor.scheduled_at)
        .bind(&cursor.exit_reason)
        .bind(cursor.retry_count)
        .bind(cursor.max_retries)
        .bind(&cursor.last_error)
        .bind(cursor.last_retry_at)
        .bind(cursor.updated_at)
        .execute(&self.pool)
        .await
        .context("failed to update contact automation")?;
        Ok(())
    }
}

/// Node execution log in Postgres
#[derive(Clone)]
pub struct PgNodeExecutionRepository {
    pool: PgPool,
}

impl PgNodeExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeExecutionRepository for PgNodeExecutionRepository {
    async fn create(&self, execution: &NodeExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO node_executions
                (id, workspace_id, contact_automation_id, node_id, node_type, action,
                 entered_at, completed_at, duration_ms, error, output)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(execution.id)
        .bind(execution.workspace_id)
        .bind(execution.contact_automation_id)
        .bind(&execution.node_id)
        .bind(&execution.node_type)
        .bind(execution.action)
        .bind(execution.entered_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(&execution.error)
        .bind(&execution.output)
        .execute(&self.pool)
        .await
        .context("failed to insert node execution")?;
        Ok(())
    }

    async fn update(&self, execution: &NodeExecution) -> Result<()> {
        // only the processing row of an attempt is ever updated in place
        sqlx::query(
            r#"
            UPDATE node_executions
            SET action = $3,
                completed_at = $4,
                duration_ms = $5,
                error = $6,
                output = $7
            WHERE workspace_id = $1 AND id = $2 AND action = 'processing'
            "#,
        )
        .bind(execution.workspace_id)
        .bind(execution.id)
        .bind(execution.action)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(&execution.error)
        .bind(&execution.output)
        .execute(&self.pool)
        .await
        .context("failed to update node execution")?;
        Ok(())
    }

    async fn list_completed(
        &self,
        workspace_id: &WorkspaceId,
        contact_automation_id: &ContactAutomationId,
    ) -> Result<Vec<NodeExecution>> {
        let executions = sqlx::query_as::<_, NodeExecution>(
            r#"
            SELECT * FROM node_executions
            WHERE workspace_id = $1
              AND contact_automation_id = $2
              AND action = 'completed'
            ORDER BY entered_at
            "#,
        )
        .bind(workspace_id)
        .bind(contact_automation_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list completed node executions")?;
        Ok(executions)
    }
}

/// Contact timeline in Postgres
#[derive(Clone)]
pub struct PgTimelineRepository {
    pool: PgPool,
}

impl PgTimelineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TimelineRepository for PgTimelineRepository {
    async fn create(&self, entry: &TimelineEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO timeline_entries
                (workspace_id, email, operation, entity_type, kind, entity_id, changes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.workspace_id)
        .bind(&entry.email)
        .bind(&entry.operation)
        .bind(&entry.entity_type)
        .bind(&entry.kind)
        .bind(entry.entity_id)
        .bind(&entry.changes)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert timeline entry")?;
        Ok(())
    }
}

/// Automation counters in Postgres
#[derive(Clone)]
pub struct PgAutomationStatsRepository {
    pool: PgPool,
}

impl PgAutomationStatsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AutomationStatsRepository for PgAutomationStatsRepository {
    async fn increment(
        &self,
        workspace_id: &WorkspaceId,
        automation_id: &AutomationId,
        stat: AutomationStat,
    ) -> Result<()> {
        let column = match stat {
            AutomationStat::Entered => "entered",
            AutomationStat::Completed => "completed",
            AutomationStat::Exited => "exited",
            AutomationStat::Failed => "failed",
        };
        let sql = format!(
            r#"
            INSERT INTO automation_stats (workspace_id, automation_id, {column})
            VALUES ($1, $2, 1)
            ON CONFLICT (workspace_id, automation_id)
            DO UPDATE SET {column} = automation_stats.{column} + 1
            "#
        );
        sqlx::query(&sql)
            .bind(workspace_id)
            .bind(automation_id)
            .execute(&self.pool)
            .await
            .context("failed to bump automation stat")?;
        Ok(())
    }
}

/// Static contact lists in Postgres
#[derive(Clone)]
pub struct PgContactListRepository {
    pool: PgPool,
}

impl PgContactListRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactListRepository for PgContactListRepository {
    async fn add(&self, workspace_id: &WorkspaceId, list_id: &ListId, email: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contact_list_members (workspace_id, list_id, email, added_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (workspace_id, list_id, email) DO NOTHING
            "#,
        )
        .bind(workspace_id)
        .bind(list_id)
        .bind(email)
        .execute(&self.pool)
        .await
        .context("failed to add contact to list")?;
        Ok(())
    }

    async fn remove(
        &self,
        workspace_id: &WorkspaceId,
        list_id: &ListId,
        email: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM contact_list_members
            WHERE workspace_id = $1 AND list_id = $2 AND email = $3
            "#,
        )
        .bind(workspace_id)
        .bind(list_id)
        .bind(email)
        .execute(&self.pool)
        .await
        .context("failed to remove contact from list")?;
        Ok(())
    }
}

/// Outbound message queue in Postgres
#[derive(Clone)]
pub struct PgEmailQueue {
    pool: PgPool,
}

impl PgEmailQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailQueue for PgEmailQueue {
    async fn enqueue(&self, message: &OutboundMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbound_messages
                (id, workspace_id, contact_email, template_id, integration_id, variables, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message.id)
        .bind(message.workspace_id)
        .bind(&message.contact_email)
        .bind(&message.template_id)
        .bind(message.integration_id)
        .bind(&message.variables)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .context("failed to enqueue outbound message")?;
        Ok(())
    }
}
