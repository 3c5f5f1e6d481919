//! In-memory port implementations
//!
//! Reference implementations of the repository contracts backed by mutexed
//! maps, plus a manually advanced clock. The worker and automation test
//! suites run the real execution logic against these.

use crate::clock::Clock;
use crate::models::{
    Automation, AutomationStat, AutomationStats, CompileTemplateRequest, CompileTemplateResult,
    Contact, ContactAutomation, ContactAutomationStatus, ContactSegmentQueueEntry, NodeExecution,
    NodeExecutionAction, OutboundMessage, Segment, Task, TaskFilter, TaskStatus, TimelineEntry,
    Workspace,
};
use crate::repository::{
    AutomationRepository, AutomationStatsRepository, ContactAutomationRepository,
    ContactListRepository, ContactRepository, ContactSegmentQueueRepository, EmailQueue,
    NodeExecutionRepository, QueueDrainBatch, SegmentRepository, TaskRepository,
    TemplateCompiler, TimelineRepository, WorkspaceRepository,
};
use crate::types::{
    AutomationId, ContactAutomationId, ListId, SegmentId, TaskId, WorkspaceId,
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock poisoned");
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().expect("clock poisoned") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock poisoned")
    }
}

/// Fixed list of workspaces; `db_pool` is unavailable in memory.
#[derive(Default)]
pub struct InMemoryWorkspaceRepository {
    workspaces: Mutex<Vec<Workspace>>,
}

impl InMemoryWorkspaceRepository {
    pub fn with(workspaces: Vec<Workspace>) -> Self {
        Self {
            workspaces: Mutex::new(workspaces),
        }
    }
}

#[async_trait]
impl WorkspaceRepository for InMemoryWorkspaceRepository {
    async fn list(&self) -> Result<Vec<Workspace>> {
        Ok(self.workspaces.lock().expect("poisoned").clone())
    }

    async fn db_pool(&self, _workspace_id: &WorkspaceId) -> Result<sqlx::PgPool> {
        Err(anyhow!("in-memory workspace repository has no database"))
    }
}

/// Task store with the same claim semantics as the Postgres one.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: Mutex<HashMap<TaskId, Task>>,
}

impl InMemoryTaskRepository {
    pub fn all(&self) -> Vec<Task> {
        self.tasks.lock().expect("poisoned").values().cloned().collect()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> Result<()> {
        task.validate()?;
        self.tasks
            .lock()
            .expect("poisoned")
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, workspace_id: &WorkspaceId, id: &TaskId) -> Result<Option<Task>> {
        Ok(self
            .tasks
            .lock()
            .expect("poisoned")
            .get(id)
            .filter(|t| t.workspace_id == *workspace_id)
            .cloned())
    }

    async fn update(&self, task: &Task) -> Result<()> {
        self.tasks
            .lock()
            .expect("poisoned")
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn save_state(
        &self,
        workspace_id: &WorkspaceId,
        id: &TaskId,
        progress: f64,
        state: &serde_json::Value,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock().expect("poisoned");
        let task = tasks
            .get_mut(id)
            .filter(|t| t.workspace_id == *workspace_id)
            .ok_or_else(|| anyhow!("task {id} not found"))?;
        task.progress = progress;
        task.state = state.clone();
        Ok(())
    }

    async fn list(&self, workspace_id: &WorkspaceId, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .lock()
            .expect("poisoned")
            .values()
            .filter(|t| t.workspace_id == *workspace_id)
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| filter.kind.as_deref().is_none_or(|k| t.kind == k))
            .cloned()
            .collect())
    }

    async fn claim_due(
        &self,
        workspace_id: &WorkspaceId,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let mut tasks = self.tasks.lock().expect("poisoned");
        let mut due: Vec<&Task> = tasks
            .values()
            .filter(|t| t.workspace_id == *workspace_id)
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.next_run_after.is_none_or(|at| at <= now))
            .collect();
        due.sort_by_key(|t| t.next_run_after);
        let ids: Vec<TaskId> = due
            .into_iter()
            .take(usize::try_from(batch_size).unwrap_or(0))
            .map(|t| t.id)
            .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = tasks.get_mut(&id) {
                task.status = TaskStatus::Running;
                claimed.push(task.clone());
            }
        }
        Ok(claimed)
    }

    async fn find_by_kind(&self, workspace_id: &WorkspaceId, kind: &str) -> Result<Option<Task>> {
        Ok(self
            .tasks
            .lock()
            .expect("poisoned")
            .values()
            .filter(|t| t.workspace_id == *workspace_id && t.kind == kind)
            .max_by_key(|t| t.created_at)
            .cloned())
    }
}

/// Segment store; predicate evaluation answers from a sql-text → matching
/// emails table configured by the test.
#[derive(Default)]
pub struct InMemorySegmentRepository {
    segments: Mutex<HashMap<SegmentId, Segment>>,
    memberships: Mutex<HashMap<(SegmentId, String), i64>>,
    matching: Mutex<HashMap<String, HashSet<String>>>,
}

impl InMemorySegmentRepository {
    pub fn insert(&self, segment: Segment) {
        self.segments
            .lock()
            .expect("poisoned")
            .insert(segment.id, segment);
    }

    /// Declare which contacts a compiled predicate matches.
    pub fn set_matching(&self, sql: impl Into<String>, emails: &[&str]) {
        self.matching.lock().expect("poisoned").insert(
            sql.into(),
            emails.iter().map(|e| (*e).to_string()).collect(),
        );
    }

    /// Membership rows of a segment as (email, version), sorted by email.
    pub fn members(&self, segment_id: &SegmentId) -> Vec<(String, i64)> {
        let mut members: Vec<(String, i64)> = self
            .memberships
            .lock()
            .expect("poisoned")
            .iter()
            .filter(|((sid, _), _)| sid == segment_id)
            .map(|((_, email), version)| (email.clone(), *version))
            .collect();
        members.sort();
        members
    }
}

#[async_trait]
impl SegmentRepository for InMemorySegmentRepository {
    async fn get(&self, workspace_id: &WorkspaceId, id: &SegmentId) -> Result<Option<Segment>> {
        Ok(self
            .segments
            .lock()
            .expect("poisoned")
            .get(id)
            .filter(|s| s.workspace_id == *workspace_id)
            .cloned())
    }

    async fn get_segments(
        &self,
        workspace_id: &WorkspaceId,
        include_deleted: bool,
    ) -> Result<Vec<Segment>> {
        use crate::models::SegmentStatus;
        let mut segments: Vec<Segment> = self
            .segments
            .lock()
            .expect("poisoned")
            .values()
            .filter(|s| s.workspace_id == *workspace_id)
            .filter(|s| include_deleted || s.status != SegmentStatus::Deleted)
            .cloned()
            .collect();
        segments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(segments)
    }

    async fn due_for_recompute(
        &self,
        workspace_id: &WorkspaceId,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Segment>> {
        use crate::models::SegmentStatus;
        let mut due: Vec<Segment> = self
            .segments
            .lock()
            .expect("poisoned")
            .values()
            .filter(|s| s.workspace_id == *workspace_id && s.status != SegmentStatus::Deleted)
            .filter(|s| s.recompute_after.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.recompute_after);
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn update(&self, segment: &Segment) -> Result<()> {
        self.segments
            .lock()
            .expect("poisoned")
            .insert(segment.id, segment.clone());
        Ok(())
    }

    async fn remove_old_memberships(
        &self,
        _workspace_id: &WorkspaceId,
        segment_id: &SegmentId,
        below_version: i64,
    ) -> Result<u64> {
        let mut memberships = self.memberships.lock().expect("poisoned");
        let before = memberships.len();
        memberships.retain(|(sid, _), version| sid != segment_id || *version >= below_version);
        Ok((before - memberships.len()) as u64)
    }

    async fn add_contact(
        &self,
        _workspace_id: &WorkspaceId,
        segment_id: &SegmentId,
        email: &str,
        version: i64,
    ) -> Result<()> {
        self.memberships
            .lock()
            .expect("poisoned")
            .insert((*segment_id, email.to_string()), version);
        Ok(())
    }

    async fn remove_contact(
        &self,
        _workspace_id: &WorkspaceId,
        segment_id: &SegmentId,
        email: &str,
    ) -> Result<()> {
        self.memberships
            .lock()
            .expect("poisoned")
            .remove(&(*segment_id, email.to_string()));
        Ok(())
    }

    async fn filter_matching(
        &self,
        _workspace_id: &WorkspaceId,
        sql: &str,
        _args: &[serde_json::Value],
        emails: &[String],
    ) -> Result<Vec<String>> {
        let matching = self.matching.lock().expect("poisoned");
        let matched = matching
            .get(sql)
            .ok_or_else(|| anyhow!("no matching rule configured for sql: {sql}"))?;
        Ok(emails
            .iter()
            .filter(|e| matched.contains(*e))
            .cloned()
            .collect())
    }

    async fn probe(
        &self,
        _workspace_id: &WorkspaceId,
        sql: &str,
        _args: &[serde_json::Value],
        email: &str,
    ) -> Result<bool> {
        let matching = self.matching.lock().expect("poisoned");
        let matched = matching
            .get(sql)
            .ok_or_else(|| anyhow!("no matching rule configured for sql: {sql}"))?;
        Ok(matched.contains(email))
    }
}

/// Contacts in email order per workspace.
#[derive(Default)]
pub struct InMemoryContactRepository {
    contacts: Mutex<HashMap<WorkspaceId, BTreeMap<String, Contact>>>,
}

impl InMemoryContactRepository {
    pub fn insert(&self, contact: Contact) {
        self.contacts
            .lock()
            .expect("poisoned")
            .entry(contact.workspace_id)
            .or_default()
            .insert(contact.email.clone(), contact);
    }
}

#[async_trait]
impl ContactRepository for InMemoryContactRepository {
    async fn count(&self, workspace_id: &WorkspaceId) -> Result<i64> {
        Ok(self
            .contacts
            .lock()
            .expect("poisoned")
            .get(workspace_id)
            .map_or(0, |m| m.len() as i64))
    }

    async fn list_batch(
        &self,
        workspace_id: &WorkspaceId,
        after_email: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Contact>> {
        let contacts = self.contacts.lock().expect("poisoned");
        let Some(map) = contacts.get(workspace_id) else {
            return Ok(Vec::new());
        };
        Ok(map
            .values()
            .filter(|c| after_email.is_none_or(|after| c.email.as_str() > after))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn get(&self, workspace_id: &WorkspaceId, email: &str) -> Result<Option<Contact>> {
        Ok(self
            .contacts
            .lock()
            .expect("poisoned")
            .get(workspace_id)
            .and_then(|m| m.get(email))
            .cloned())
    }
}

/// FIFO recheck queue with one row per contact. Drains evaluate against the
/// segment repository the queue was built with.
pub struct InMemoryContactSegmentQueue {
    entries: Arc<Mutex<HashMap<WorkspaceId, Vec<ContactSegmentQueueEntry>>>>,
    segments: Arc<InMemorySegmentRepository>,
}

impl InMemoryContactSegmentQueue {
    pub fn new(segments: Arc<InMemorySegmentRepository>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            segments,
        }
    }
}

#[async_trait]
impl ContactSegmentQueueRepository for InMemoryContactSegmentQueue {
    async fn enqueue(&self, workspace_id: &WorkspaceId, email: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("poisoned");
        let queue = entries.entry(*workspace_id).or_default();
        if !queue.iter().any(|e| e.email == email) {
            queue.push(ContactSegmentQueueEntry {
                workspace_id: *workspace_id,
                email: email.to_string(),
                queued_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn queue_size(&self, workspace_id: &WorkspaceId) -> Result<i64> {
        Ok(self
            .entries
            .lock()
            .expect("poisoned")
            .get(workspace_id)
            .map_or(0, |q| q.len() as i64))
    }

    async fn begin_drain(
        &self,
        workspace_id: &WorkspaceId,
        limit: i64,
    ) -> Result<Box<dyn QueueDrainBatch>> {
        let claimed = {
            let entries = self.entries.lock().expect("poisoned");
            entries
                .get(workspace_id)
                .map(|queue| {
                    queue
                        .iter()
                        .take(usize::try_from(limit).unwrap_or(0))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(Box::new(InMemoryQueueDrain {
            queue: Arc::clone(&self.entries),
            segments: Arc::clone(&self.segments),
            workspace_id: *workspace_id,
            claimed,
            staged: Vec::new(),
        }))
    }
}

enum StagedMembershipOp {
    Add {
        segment_id: SegmentId,
        email: String,
        version: i64,
    },
    Remove {
        segment_id: SegmentId,
        email: String,
    },
}

/// Drain batch over the in-memory queue. Writes are staged and only applied
/// on commit, mirroring the transactional store.
struct InMemoryQueueDrain {
    queue: Arc<Mutex<HashMap<WorkspaceId, Vec<ContactSegmentQueueEntry>>>>,
    segments: Arc<InMemorySegmentRepository>,
    workspace_id: WorkspaceId,
    claimed: Vec<ContactSegmentQueueEntry>,
    staged: Vec<StagedMembershipOp>,
}

#[async_trait]
impl QueueDrainBatch for InMemoryQueueDrain {
    fn entries(&self) -> &[ContactSegmentQueueEntry] {
        &self.claimed
    }

    async fn probe(
        &mut self,
        sql: &str,
        args: &[serde_json::Value],
        email: &str,
    ) -> Result<bool> {
        self.segments
            .probe(&self.workspace_id, sql, args, email)
            .await
    }

    async fn add_contact(
        &mut self,
        segment_id: &SegmentId,
        email: &str,
        version: i64,
    ) -> Result<()> {
        self.staged.push(StagedMembershipOp::Add {
            segment_id: *segment_id,
            email: email.to_string(),
            version,
        });
        Ok(())
    }

    async fn remove_contact(&mut self, segment_id: &SegmentId, email: &str) -> Result<()> {
        self.staged.push(StagedMembershipOp::Remove {
            segment_id: *segment_id,
            email: email.to_string(),
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        for op in &self.staged {
            match op {
                StagedMembershipOp::Add {
                    segment_id,
                    email,
                    version,
                } => {
                    self.segments
                        .add_contact(&self.workspace_id, segment_id, email, *version)
                        .await?;
                }
                StagedMembershipOp::Remove { segment_id, email } => {
                    self.segments
                        .remove_contact(&self.workspace_id, segment_id, email)
                        .await?;
                }
            }
        }

        let mut entries = self.queue.lock().expect("poisoned");
        if let Some(queue) = entries.get_mut(&self.workspace_id) {
            queue.retain(|e| !self.claimed.iter().any(|c| c.email == e.email));
        }
        Ok(())
    }
}

/// Automation definitions.
#[derive(Default)]
pub struct InMemoryAutomationRepository {
    automations: Mutex<HashMap<AutomationId, Automation>>,
}

impl InMemoryAutomationRepository {
    pub fn insert(&self, automation: Automation) {
        self.automations
            .lock()
            .expect("poisoned")
            .insert(automation.id, automation);
    }
}

#[async_trait]
impl AutomationRepository for InMemoryAutomationRepository {
    async fn get(
        &self,
        workspace_id: &WorkspaceId,
        id: &AutomationId,
    ) -> Result<Option<Automation>> {
        Ok(self
            .automations
            .lock()
            .expect("poisoned")
            .get(id)
            .filter(|a| a.workspace_id == *workspace_id)
            .cloned())
    }
}

/// Contact automation cursors.
#[derive(Default)]
pub struct InMemoryContactAutomationRepository {
    cursors: Mutex<HashMap<ContactAutomationId, ContactAutomation>>,
}

impl InMemoryContactAutomationRepository {
    pub fn insert(&self, cursor: ContactAutomation) {
        self.cursors
            .lock()
            .expect("poisoned")
            .insert(cursor.id, cursor);
    }

    pub fn all(&self) -> Vec<ContactAutomation> {
        self.cursors.lock().expect("poisoned").values().cloned().collect()
    }
}

#[async_trait]
impl ContactAutomationRepository for InMemoryContactAutomationRepository {
    async fn get(
        &self,
        workspace_id: &WorkspaceId,
        id: &ContactAutomationId,
    ) -> Result<Option<ContactAutomation>> {
        Ok(self
            .cursors
            .lock()
            .expect("poisoned")
            .get(id)
            .filter(|c| c.workspace_id == *workspace_id)
            .cloned())
    }

    async fn claim_due(
        &self,
        workspace_id: &WorkspaceId,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContactAutomation>> {
        let cursors = self.cursors.lock().expect("poisoned");
        let mut due: Vec<ContactAutomation> = cursors
            .values()
            .filter(|c| c.workspace_id == *workspace_id)
            .filter(|c| c.status == ContactAutomationStatus::Active)
            .filter(|c| c.scheduled_at.is_none_or(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|c| c.scheduled_at);
        due.truncate(usize::try_from(batch_size).unwrap_or(0));
        Ok(due)
    }

    async fn update(&self, cursor: &ContactAutomation) -> Result<()> {
        self.cursors
            .lock()
            .expect("poisoned")
            .insert(cursor.id, cursor.clone());
        Ok(())
    }
}

/// Node execution log, append order preserved.
#[derive(Default)]
pub struct InMemoryNodeExecutionRepository {
    executions: Mutex<Vec<NodeExecution>>,
}

impl InMemoryNodeExecutionRepository {
    pub fn all(&self) -> Vec<NodeExecution> {
        self.executions.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl NodeExecutionRepository for InMemoryNodeExecutionRepository {
    async fn create(&self, execution: &NodeExecution) -> Result<()> {
        self.executions
            .lock()
            .expect("poisoned")
            .push(execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &NodeExecution) -> Result<()> {
        let mut executions = self.executions.lock().expect("poisoned");
        let slot = executions
            .iter_mut()
            .find(|e| e.id == execution.id)
            .ok_or_else(|| anyhow!("node execution {} not found", execution.id))?;
        *slot = execution.clone();
        Ok(())
    }

    async fn list_completed(
        &self,
        _workspace_id: &WorkspaceId,
        contact_automation_id: &ContactAutomationId,
    ) -> Result<Vec<NodeExecution>> {
        Ok(self
            .executions
            .lock()
            .expect("poisoned")
            .iter()
            .filter(|e| e.contact_automation_id == *contact_automation_id)
            .filter(|e| e.action == NodeExecutionAction::Completed)
            .cloned()
            .collect())
    }
}

/// Timeline sink that remembers every entry.
#[derive(Default)]
pub struct InMemoryTimelineRepository {
    entries: Mutex<Vec<TimelineEntry>>,
}

impl InMemoryTimelineRepository {
    pub fn entries(&self) -> Vec<TimelineEntry> {
        self.entries.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl TimelineRepository for InMemoryTimelineRepository {
    async fn create(&self, entry: &TimelineEntry) -> Result<()> {
        self.entries.lock().expect("poisoned").push(entry.clone());
        Ok(())
    }
}

/// Automation counters.
#[derive(Default)]
pub struct InMemoryAutomationStatsRepository {
    stats: Mutex<HashMap<AutomationId, AutomationStats>>,
}

impl InMemoryAutomationStatsRepository {
    pub fn stats(&self, automation_id: &AutomationId) -> AutomationStats {
        self.stats
            .lock()
            .expect("poisoned")
            .get(automation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AutomationStatsRepository for InMemoryAutomationStatsRepository {
    async fn increment(
        &self,
        _workspace_id: &WorkspaceId,
        automation_id: &AutomationId,
        stat: AutomationStat,
    ) -> Result<()> {
        let mut stats = self.stats.lock().expect("poisoned");
        let entry = stats.entry(*automation_id).or_default();
        match stat {
            AutomationStat::Entered => entry.entered += 1,
            AutomationStat::Completed => entry.completed += 1,
            AutomationStat::Exited => entry.exited += 1,
            AutomationStat::Failed => entry.failed += 1,
        }
        Ok(())
    }
}

/// Contact list membership sets.
#[derive(Default)]
pub struct InMemoryContactListRepository {
    members: Mutex<HashMap<ListId, HashSet<String>>>,
}

impl InMemoryContactListRepository {
    pub fn members(&self, list_id: &ListId) -> Vec<String> {
        let mut members: Vec<String> = self
            .members
            .lock()
            .expect("poisoned")
            .get(list_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }
}

#[async_trait]
impl ContactListRepository for InMemoryContactListRepository {
    async fn add(&self, _workspace_id: &WorkspaceId, list_id: &ListId, email: &str) -> Result<()> {
        self.members
            .lock()
            .expect("poisoned")
            .entry(*list_id)
            .or_default()
            .insert(email.to_string());
        Ok(())
    }

    async fn remove(
        &self,
        _workspace_id: &WorkspaceId,
        list_id: &ListId,
        email: &str,
    ) -> Result<()> {
        if let Some(members) = self.members.lock().expect("poisoned").get_mut(list_id) {
            members.remove(email);
        }
        Ok(())
    }
}

/// Email queue that records enqueued messages.
#[derive(Default)]
pub struct InMemoryEmailQueue {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl InMemoryEmailQueue {
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl EmailQueue for InMemoryEmailQueue {
    async fn enqueue(&self, message: &OutboundMessage) -> Result<()> {
        self.messages.lock().expect("poisoned").push(message.clone());
        Ok(())
    }
}

/// Template compiler that always succeeds with a fixed document.
pub struct StaticTemplateCompiler {
    pub html: String,
}

impl Default for StaticTemplateCompiler {
    fn default() -> Self {
        Self {
            html: "<html><body>ok</body></html>".to_string(),
        }
    }
}

#[async_trait]
impl TemplateCompiler for StaticTemplateCompiler {
    async fn compile(&self, _request: &CompileTemplateRequest) -> Result<CompileTemplateResult> {
        Ok(CompileTemplateResult {
            success: true,
            html: Some(self.html.clone()),
            error: None,
        })
    }
}
