//! Postgres repositories for the segment engine
//!
//! Compiled predicates are WHERE fragments with placeholders starting at
//! `$1`; the queries here prepend their own arguments (workspace, contact
//! keys) and rebind the fragment past them.

use crate::rebind::rebind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowmail_core::models::{Contact, ContactSegmentQueueEntry, Segment};
use flowmail_core::repository::{
    ContactRepository, ContactSegmentQueueRepository, QueueDrainBatch, SegmentRepository,
};
use flowmail_core::types::{SegmentId, WorkspaceId};
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryScalar;
use sqlx::{PgPool, Postgres, Transaction};

type PgTransaction = Transaction<'static, Postgres>;

/// Append one JSON argument to a scalar query with its natural SQL type.
fn bind_arg<'q, O>(
    query: QueryScalar<'q, sqlx::Postgres, O, PgArguments>,
    value: &Value,
) -> QueryScalar<'q, sqlx::Postgres, O, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.clone()),
    }
}

/// Segment definitions and membership rows in Postgres
#[derive(Clone)]
pub struct PgSegmentRepository {
    pool: PgPool,
}

impl PgSegmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SegmentRepository for PgSegmentRepository {
    async fn get(&self, workspace_id: &WorkspaceId, id: &SegmentId) -> Result<Option<Segment>> {
        let segment = sqlx::query_as::<_, Segment>(
            "SELECT * FROM segments WHERE workspace_id = $1 AND id = $2",
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load segment")?;
        Ok(segment)
    }

    async fn get_segments(
        &self,
        workspace_id: &WorkspaceId,
        include_deleted: bool,
    ) -> Result<Vec<Segment>> {
        let segments = sqlx::query_as::<_, Segment>(
            r#"
            SELECT * FROM segments
            WHERE workspace_id = $1
              AND ($2 OR status <> 'deleted')
            ORDER BY name
            "#,
        )
        .bind(workspace_id)
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await
        .context("failed to list segments")?;
        Ok(segments)
    }

    async fn due_for_recompute(
        &self,
        workspace_id: &WorkspaceId,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Segment>> {
        let segments = sqlx::query_as::<_, Segment>(
            r#"
            SELECT * FROM segments
            WHERE workspace_id = $1
              AND status <> 'deleted'
              AND recompute_after IS NOT NULL
              AND recompute_after <= $2
            ORDER BY recompute_after
            LIMIT $3
            "#,
        )
        .bind(workspace_id)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to list segments due for recompute")?;
        Ok(segments)
    }

    async fn update(&self, segment: &Segment) -> Result<()> {
        let tree = serde_json::to_value(&segment.tree).context("failed to serialize tree")?;
        sqlx::query(
            r#"
            UPDATE segments
            SET name = $3,
                status = $4,
                version = $5,
                tree = $6,
                generated_sql = $7,
                generated_args = $8,
                recompute_after = $9,
                recompute_interval_hours = $10,
                updated_at = NOW()
            WHERE workspace_id = $1 AND id = $2
            "#,
        )
        .bind(segment.workspace_id)
        .bind(segment.id)
        .bind(&segment.name)
        .bind(segment.status)
        .bind(segment.version)
        .bind(tree)
        .bind(&segment.generated_sql)
        .bind(&segment.generated_args)
        .bind(segment.recompute_after)
        .bind(segment.recompute_interval_hours)
        .execute(&self.pool)
        .await
        .context("failed to update segment")?;
        Ok(())
    }

    async fn remove_old_memberships(
        &self,
        workspace_id: &WorkspaceId,
        segment_id: &SegmentId,
        below_version: i64,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM contact_segment_memberships
            WHERE workspace_id = $1 AND segment_id = $2 AND version < $3
            "#,
        )
        .bind(workspace_id)
        .bind(segment_id)
        .bind(below_version)
        .execute(&self.pool)
        .await
        .context("failed to remove stale memberships")?;
        Ok(result.rows_affected())
    }

    async fn add_contact(
        &self,
        workspace_id: &WorkspaceId,
        segment_id: &SegmentId,
        email: &str,
        version: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contact_segment_memberships (workspace_id, segment_id, email, version, added_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (workspace_id, segment_id, email)
            DO UPDATE SET version = EXCLUDED.version
            "#,
        )
        .bind(workspace_id)
        .bind(segment_id)
        .bind(email)
        .bind(version)
        .execute(&self.pool)
        .await
        .context("failed to upsert membership")?;
        Ok(())
    }

    async fn remove_contact(
        &self,
        workspace_id: &WorkspaceId,
        segment_id: &SegmentId,
        email: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM contact_segment_memberships
            WHERE workspace_id = $1 AND segment_id = $2 AND email = $3
            "#,
        )
        .bind(workspace_id)
        .bind(segment_id)
        .bind(email)
        .execute(&self.pool)
        .await
        .context("failed to remove membership")?;
        Ok(())
    }

    async fn filter_matching(
        &self,
        workspace_id: &WorkspaceId,
        sql: &str,
        args: &[Value],
        emails: &[String],
    ) -> Result<Vec<String>> {
        // contact-level args occupy $1/$2; the fragment is rebound past them
        let query_sql = format!(
            "SELECT email FROM contacts WHERE workspace_id = $1 AND email = ANY($2) AND ({})",
            rebind(sql, 3)
        );
        let mut query = sqlx::query_scalar::<_, String>(&query_sql)
            .bind(workspace_id)
            .bind(emails.to_vec());
        for arg in args {
            query = bind_arg(query, arg);
        }
        let matched = query
            .fetch_all(&self.pool)
            .await
            .context("failed to evaluate segment over contact batch")?;
        Ok(matched)
    }

    async fn probe(
        &self,
        workspace_id: &WorkspaceId,
        sql: &str,
        args: &[Value],
        email: &str,
    ) -> Result<bool> {
        let query_sql = format!(
            "SELECT EXISTS(SELECT 1 FROM contacts WHERE workspace_id = $1 AND email = $2 AND ({}))",
            rebind(sql, 3)
        );
        let mut query = sqlx::query_scalar::<_, bool>(&query_sql)
            .bind(workspace_id)
            .bind(email.to_string());
        for arg in args {
            query = bind_arg(query, arg);
        }
        let matched = query
            .fetch_one(&self.pool)
            .await
            .context("failed to evaluate segment for contact")?;
        Ok(matched)
    }
}

/// Contact profiles in Postgres
#[derive(Clone)]
pub struct PgContactRepository {
    pool: PgPool,
}

impl PgContactRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactRepository for PgContactRepository {
    async fn count(&self, workspace_id: &WorkspaceId) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM contacts WHERE workspace_id = $1")
                .bind(workspace_id)
                .fetch_one(&self.pool)
                .await
                .context("failed to count contacts")?;
        Ok(count)
    }

    async fn list_batch(
        &self,
        workspace_id: &WorkspaceId,
        after_email: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Contact>> {
        let contacts = sqlx::query_as::<_, Contact>(
            r#"
            SELECT * FROM contacts
            WHERE workspace_id = $1
              AND ($2::text IS NULL OR email > $2)
            ORDER BY email
            LIMIT $3
            "#,
        )
        .bind(workspace_id)
        .bind(after_email)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to page contacts")?;
        Ok(contacts)
    }

    async fn get(&self, workspace_id: &WorkspaceId, email: &str) -> Result<Option<Contact>> {
        let contact = sqlx::query_as::<_, Contact>(
            "SELECT * FROM contacts WHERE workspace_id = $1 AND email = $2",
        )
        .bind(workspace_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load contact")?;
        Ok(contact)
    }
}

/// Incremental recheck queue in Postgres
#[derive(Clone)]
pub struct PgContactSegmentQueueRepository {
    pool: PgPool,
}

impl PgContactSegmentQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactSegmentQueueRepository for PgContactSegmentQueueRepository {
    async fn enqueue(&self, workspace_id: &WorkspaceId, email: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contact_segment_queue (workspace_id, email, queued_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (workspace_id, email) DO NOTHING
            "#,
        )
        .bind(workspace_id)
        .bind(email)
        .execute(&self.pool)
        .await
        .context("failed to enqueue contact recheck")?;
        Ok(())
    }

    async fn queue_size(&self, workspace_id: &WorkspaceId) -> Result<i64> {
        let size = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM contact_segment_queue WHERE workspace_id = $1",
        )
        .bind(workspace_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to read queue size")?;
        Ok(size)
    }

    async fn begin_drain(
        &self,
        workspace_id: &WorkspaceId,
        limit: i64,
    ) -> Result<Box<dyn QueueDrainBatch>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open queue drain transaction")?;

        // lock the oldest rows without removing them; concurrent drains
        // skip each other's claims, and a rollback leaves the rows queued
        let entries = sqlx::query_as::<_, ContactSegmentQueueEntry>(
            r#"
            SELECT workspace_id, email, queued_at
            FROM contact_segment_queue
            WHERE workspace_id = $1
            ORDER BY queued_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(workspace_id)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .context("failed to claim queue batch")?;

        Ok(Box::new(PgQueueDrain {
            tx,
            workspace_id: *workspace_id,
            entries,
        }))
    }
}

/// Drain batch pinned to one Postgres transaction: the claim, every probe
/// and membership write, and the final delete share it. Dropping the batch
/// rolls the transaction back.
struct PgQueueDrain {
    tx: PgTransaction,
    workspace_id: WorkspaceId,
    entries: Vec<ContactSegmentQueueEntry>,
}

#[async_trait]
impl QueueDrainBatch for PgQueueDrain {
    fn entries(&self) -> &[ContactSegmentQueueEntry] {
        &self.entries
    }

    async fn probe(&mut self, sql: &str, args: &[Value], email: &str) -> Result<bool> {
        let query_sql = format!(
            "SELECT EXISTS(SELECT 1 FROM contacts WHERE workspace_id = $1 AND email = $2 AND ({}))",
            rebind(sql, 3)
        );
        let mut query = sqlx::query_scalar::<_, bool>(&query_sql)
            .bind(self.workspace_id)
            .bind(email.to_string());
        for arg in args {
            query = bind_arg(query, arg);
        }
        let matched = query
            .fetch_one(&mut *self.tx)
            .await
            .context("failed to evaluate segment for queued contact")?;
        Ok(matched)
    }

    async fn add_contact(
        &mut self,
        segment_id: &SegmentId,
        email: &str,
        version: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contact_segment_memberships (workspace_id, segment_id, email, version, added_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (workspace_id, segment_id, email)
            DO UPDATE SET version = EXCLUDED.version
            "#,
        )
        .bind(self.workspace_id)
        .bind(segment_id)
        .bind(email)
        .bind(version)
        .execute(&mut *self.tx)
        .await
        .context("failed to stage membership upsert")?;
        Ok(())
    }

    async fn remove_contact(&mut self, segment_id: &SegmentId, email: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM contact_segment_memberships
            WHERE workspace_id = $1 AND segment_id = $2 AND email = $3
            "#,
        )
        .bind(self.workspace_id)
        .bind(segment_id)
        .bind(email)
        .execute(&mut *self.tx)
        .await
        .context("failed to stage membership removal")?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let emails: Vec<String> = self.entries.iter().map(|e| e.email.clone()).collect();
        sqlx::query(
            "DELETE FROM contact_segment_queue WHERE workspace_id = $1 AND email = ANY($2)",
        )
        .bind(self.workspace_id)
        .bind(emails)
        .execute(&mut *self.tx)
        .await
        .context("failed to delete processed queue rows")?;

        self.tx
            .commit()
            .await
            .context("failed to commit queue drain")?;
        Ok(())
    }
}
