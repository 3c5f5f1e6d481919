//! Repository contracts (ports)
//!
//! The execution fabric is written against these traits; Postgres
//! implementations live next to their consumers and in-memory ones in the
//! `test-util` feature. All methods are workspace-scoped.

use crate::models::{
    Automation, AutomationStat, CompileTemplateRequest, CompileTemplateResult, Contact,
    ContactAutomation, ContactSegmentQueueEntry, NodeExecution, OutboundMessage, Segment, Task,
    TaskFilter, TimelineEntry, Workspace,
};
use crate::types::{
    AutomationId, ContactAutomationId, ListId, SegmentId, TaskId, WorkspaceId,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Tenant directory and database routing
#[async_trait]
pub trait WorkspaceRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Workspace>>;

    /// Connection pool serving the workspace's data.
    async fn db_pool(&self, workspace_id: &WorkspaceId) -> Result<sqlx::PgPool>;
}

/// Durable task store
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> Result<()>;

    async fn get(&self, workspace_id: &WorkspaceId, id: &TaskId) -> Result<Option<Task>>;

    async fn update(&self, task: &Task) -> Result<()>;

    /// Checkpoint progress and payload without touching scheduling fields.
    async fn save_state(
        &self,
        workspace_id: &WorkspaceId,
        id: &TaskId,
        progress: f64,
        state: &serde_json::Value,
    ) -> Result<()>;

    async fn list(&self, workspace_id: &WorkspaceId, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Atomically claim up to `batch_size` due pending tasks, marking them
    /// running. Claims are exclusive across concurrent runners.
    async fn claim_due(
        &self,
        workspace_id: &WorkspaceId,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>>;

    /// Most recent task of the given kind, regardless of status.
    async fn find_by_kind(&self, workspace_id: &WorkspaceId, kind: &str) -> Result<Option<Task>>;
}

/// Segment definitions and membership rows
#[async_trait]
pub trait SegmentRepository: Send + Sync {
    async fn get(&self, workspace_id: &WorkspaceId, id: &SegmentId) -> Result<Option<Segment>>;

    async fn get_segments(
        &self,
        workspace_id: &WorkspaceId,
        include_deleted: bool,
    ) -> Result<Vec<Segment>>;

    async fn due_for_recompute(
        &self,
        workspace_id: &WorkspaceId,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Segment>>;

    async fn update(&self, segment: &Segment) -> Result<()>;

    /// Drop membership rows older than `below_version` for the segment.
    async fn remove_old_memberships(
        &self,
        workspace_id: &WorkspaceId,
        segment_id: &SegmentId,
        below_version: i64,
    ) -> Result<u64>;

    /// Upsert a membership at the given version. Idempotent.
    async fn add_contact(
        &self,
        workspace_id: &WorkspaceId,
        segment_id: &SegmentId,
        email: &str,
        version: i64,
    ) -> Result<()>;

    /// Remove a membership. Idempotent.
    async fn remove_contact(
        &self,
        workspace_id: &WorkspaceId,
        segment_id: &SegmentId,
        email: &str,
    ) -> Result<()>;

    /// Evaluate a compiled predicate against a set of contacts, returning the
    /// emails that match.
    async fn filter_matching(
        &self,
        workspace_id: &WorkspaceId,
        sql: &str,
        args: &[serde_json::Value],
        emails: &[String],
    ) -> Result<Vec<String>>;

    /// Evaluate a compiled predicate against a single contact.
    async fn probe(
        &self,
        workspace_id: &WorkspaceId,
        sql: &str,
        args: &[serde_json::Value],
        email: &str,
    ) -> Result<bool>;
}

/// Contact profiles
#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn count(&self, workspace_id: &WorkspaceId) -> Result<i64>;

    /// Page through contacts in email order, resuming after `after_email`.
    async fn list_batch(
        &self,
        workspace_id: &WorkspaceId,
        after_email: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Contact>>;

    async fn get(&self, workspace_id: &WorkspaceId, email: &str) -> Result<Option<Contact>>;
}

/// Incremental segment-membership recheck queue
#[async_trait]
pub trait ContactSegmentQueueRepository: Send + Sync {
    async fn enqueue(&self, workspace_id: &WorkspaceId, email: &str) -> Result<()>;

    async fn queue_size(&self, workspace_id: &WorkspaceId) -> Result<i64>;

    /// Open a drain transaction claiming up to `limit` of the oldest queue
    /// rows. The rows stay queued until [`QueueDrainBatch::commit`]; other
    /// drains skip them while the batch is held.
    async fn begin_drain(
        &self,
        workspace_id: &WorkspaceId,
        limit: i64,
    ) -> Result<Box<dyn QueueDrainBatch>>;
}

/// One claimed drain batch, held inside a store transaction.
///
/// Evaluation and membership writes happen through the batch so they share
/// the transaction. Dropping the batch without committing rolls everything
/// back: no membership write lands and the claimed rows stay queued.
#[async_trait]
pub trait QueueDrainBatch: Send {
    /// The claimed rows, oldest first.
    fn entries(&self) -> &[ContactSegmentQueueEntry];

    /// Evaluate a compiled predicate against one claimed contact.
    async fn probe(
        &mut self,
        sql: &str,
        args: &[serde_json::Value],
        email: &str,
    ) -> Result<bool>;

    /// Stage a membership upsert at the given version.
    async fn add_contact(
        &mut self,
        segment_id: &SegmentId,
        email: &str,
        version: i64,
    ) -> Result<()>;

    /// Stage a membership removal.
    async fn remove_contact(&mut self, segment_id: &SegmentId, email: &str) -> Result<()>;

    /// Delete the claimed rows and commit every staged write. On failure the
    /// transaction is rolled back and the rows remain queued for the next
    /// iteration.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Automation definitions
#[async_trait]
pub trait AutomationRepository: Send + Sync {
    async fn get(
        &self,
        workspace_id: &WorkspaceId,
        id: &AutomationId,
    ) -> Result<Option<Automation>>;
}

/// Per-contact automation cursors
#[async_trait]
pub trait ContactAutomationRepository: Send + Sync {
    async fn get(
        &self,
        workspace_id: &WorkspaceId,
        id: &ContactAutomationId,
    ) -> Result<Option<ContactAutomation>>;

    /// Claim up to `batch_size` active cursors whose wake time has passed.
    async fn claim_due(
        &self,
        workspace_id: &WorkspaceId,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContactAutomation>>;

    async fn update(&self, cursor: &ContactAutomation) -> Result<()>;
}

/// Node execution log
#[async_trait]
pub trait NodeExecutionRepository: Send + Sync {
    async fn create(&self, execution: &NodeExecution) -> Result<()>;

    async fn update(&self, execution: &NodeExecution) -> Result<()>;

    /// Completed executions of a cursor, oldest first.
    async fn list_completed(
        &self,
        workspace_id: &WorkspaceId,
        contact_automation_id: &ContactAutomationId,
    ) -> Result<Vec<NodeExecution>>;
}

/// Contact timeline sink
#[async_trait]
pub trait TimelineRepository: Send + Sync {
    async fn create(&self, entry: &TimelineEntry) -> Result<()>;
}

/// Per-automation counters
#[async_trait]
pub trait AutomationStatsRepository: Send + Sync {
    async fn increment(
        &self,
        workspace_id: &WorkspaceId,
        automation_id: &AutomationId,
        stat: AutomationStat,
    ) -> Result<()>;
}

/// Static contact lists
#[async_trait]
pub trait ContactListRepository: Send + Sync {
    /// Add a contact to a list. Idempotent.
    async fn add(&self, workspace_id: &WorkspaceId, list_id: &ListId, email: &str) -> Result<()>;

    /// Remove a contact from a list. Idempotent.
    async fn remove(&self, workspace_id: &WorkspaceId, list_id: &ListId, email: &str)
    -> Result<()>;
}

/// Outbound message queue consumed by the sender process
#[async_trait]
pub trait EmailQueue: Send + Sync {
    async fn enqueue(&self, message: &OutboundMessage) -> Result<()>;
}

/// Template compiler collaborator
#[async_trait]
pub trait TemplateCompiler: Send + Sync {
    async fn compile(&self, request: &CompileTemplateRequest) -> Result<CompileTemplateResult>;
}
