//! End-to-end executor scenarios on in-memory stores with a manual clock.

use anyhow::anyhow;
use async_trait::async_trait;
use automation::executor::end_reason;
use automation::{AutomationExecutor, NodeContext, NodeError, NodeExecutor, NodeExecutorRegistry, NodeOutcome};
use chrono::{Duration, TimeZone, Utc};
use flowmail_core::Clock;
use flowmail_core::memory::{
    InMemoryAutomationRepository, InMemoryAutomationStatsRepository,
    InMemoryContactAutomationRepository, InMemoryContactListRepository,
    InMemoryContactRepository, InMemoryEmailQueue, InMemoryNodeExecutionRepository,
    InMemorySegmentRepository, InMemoryTimelineRepository, ManualClock,
};
use flowmail_core::models::{
    Automation, AutomationStatus, Contact, ContactAutomation, ContactAutomationStatus, Node,
    NodeConfig, NodeExecutionAction, node_type, timeline_op,
};
use flowmail_core::types::{AutomationId, IntegrationId, ListId, NodeId, WorkspaceId};
use serde_json::json;
use std::sync::Arc;

struct Harness {
    automations: Arc<InMemoryAutomationRepository>,
    cursors: Arc<InMemoryContactAutomationRepository>,
    executions: Arc<InMemoryNodeExecutionRepository>,
    contacts: Arc<InMemoryContactRepository>,
    timeline: Arc<InMemoryTimelineRepository>,
    stats: Arc<InMemoryAutomationStatsRepository>,
    queue: Arc<InMemoryEmailQueue>,
    clock: Arc<ManualClock>,
    executor: AutomationExecutor,
}

fn harness_with_registry(build: impl FnOnce(&Harness) -> NodeExecutorRegistry) -> Harness {
    let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
    let automations = Arc::new(InMemoryAutomationRepository::default());
    let cursors = Arc::new(InMemoryContactAutomationRepository::default());
    let executions = Arc::new(InMemoryNodeExecutionRepository::default());
    let contacts = Arc::new(InMemoryContactRepository::default());
    let timeline = Arc::new(InMemoryTimelineRepository::default());
    let stats = Arc::new(InMemoryAutomationStatsRepository::default());
    let queue = Arc::new(InMemoryEmailQueue::default());
    let clock = Arc::new(ManualClock::new(t0));

    let mut harness = Harness {
        automations: Arc::clone(&automations),
        cursors: Arc::clone(&cursors),
        executions: Arc::clone(&executions),
        contacts: Arc::clone(&contacts),
        timeline: Arc::clone(&timeline),
        stats: Arc::clone(&stats),
        queue: Arc::clone(&queue),
        clock: Arc::clone(&clock),
        // placeholder, replaced below once the registry exists
        executor: AutomationExecutor::new(
            automations.clone(),
            cursors.clone(),
            executions.clone(),
            contacts.clone(),
            timeline.clone(),
            stats.clone(),
            NodeExecutorRegistry::new(),
            clock.clone(),
        ),
    };
    let registry = build(&harness);
    harness.executor = AutomationExecutor::new(
        automations,
        cursors,
        executions,
        contacts,
        timeline,
        stats,
        registry,
        clock,
    );
    harness
}

fn harness() -> Harness {
    harness_with_registry(|h| {
        let segments = Arc::new(InMemorySegmentRepository::default());
        let lists = Arc::new(InMemoryContactListRepository::default());
        NodeExecutorRegistry::with_defaults(segments, lists, Arc::clone(&h.queue) as _)
    })
}

/// trigger -> delay(60s) -> email (terminal)
fn welcome_automation(workspace_id: WorkspaceId) -> Automation {
    let now = Utc::now();
    Automation {
        id: AutomationId::new(),
        workspace_id,
        name: "welcome".into(),
        status: AutomationStatus::Live,
        list_id: Some(ListId::new()),
        nodes: vec![
            Node {
                id: NodeId::new("trigger"),
                config: NodeConfig::Trigger {
                    next: Some(NodeId::new("wait")),
                },
            },
            Node {
                id: NodeId::new("wait"),
                config: NodeConfig::Delay {
                    seconds: 60,
                    next: Some(NodeId::new("send")),
                },
            },
            Node {
                id: NodeId::new("send"),
                config: NodeConfig::Email {
                    template_id: "T".into(),
                    integration_id: IntegrationId::new(),
                    variables: json!({}),
                    next: None,
                },
            },
        ],
        created_at: now,
        updated_at: now,
    }
}

fn seed(h: &Harness, automation: &Automation, email: &str) -> ContactAutomation {
    h.automations.insert(automation.clone());
    h.contacts
        .insert(Contact::new(automation.workspace_id, email));
    let cursor = ContactAutomation::enter(
        automation.workspace_id,
        automation,
        email,
        h.clock.now(),
    )
    .unwrap();
    h.cursors.insert(cursor.clone());
    cursor
}

async fn current(h: &Harness, cursor: &ContactAutomation) -> ContactAutomation {
    use flowmail_core::repository::ContactAutomationRepository;
    h.cursors
        .get(&cursor.workspace_id, &cursor.id)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn happy_path_delay_then_email_completes_with_one_end_event() {
    let h = harness();
    let workspace_id = WorkspaceId::new();
    let automation = welcome_automation(workspace_id);
    let cursor = seed(&h, &automation, "ada@example.com");
    let t0 = h.clock.now();

    // t=0: trigger advances into the delay, which parks the cursor at t+60
    h.executor.execute(cursor.clone()).await.unwrap();
    let parked = current(&h, &cursor).await;
    assert_eq!(parked.status, ContactAutomationStatus::Active);
    assert_eq!(parked.current_node_id, Some(NodeId::new("send")));
    assert_eq!(parked.scheduled_at, Some(t0 + Duration::seconds(60)));
    assert!(h.queue.messages().is_empty());

    // t=59: the cursor is not due, so the batch claim must not surface it
    use flowmail_core::repository::ContactAutomationRepository;
    h.clock.advance(Duration::seconds(59));
    let due = h
        .cursors
        .claim_due(&workspace_id, 10, h.clock.now())
        .await
        .unwrap();
    assert!(due.is_empty(), "cursor ran before its wake time");

    // t=60: the email node runs and the journey completes
    h.clock.advance(Duration::seconds(1));
    let due = h
        .cursors
        .claim_due(&workspace_id, 10, h.clock.now())
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    h.executor.execute(due.into_iter().next().unwrap()).await.unwrap();

    let done = current(&h, &cursor).await;
    assert_eq!(done.status, ContactAutomationStatus::Completed);
    assert_eq!(done.current_node_id, None);
    assert_eq!(done.scheduled_at, None);
    assert_eq!(h.queue.messages().len(), 1);

    // exactly one automation.end event
    let ends: Vec<_> = h
        .timeline
        .entries()
        .into_iter()
        .filter(|e| e.operation == timeline_op::AUTOMATION_END)
        .collect();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].kind, end_reason::COMPLETED);
    assert_eq!(h.stats.stats(&automation.id).completed, 1);
}

#[tokio::test]
async fn node_deleted_mid_wait_exits_the_contact() {
    let h = harness();
    let workspace_id = WorkspaceId::new();
    let mut automation = welcome_automation(workspace_id);
    let cursor = seed(&h, &automation, "bob@example.com");

    // advance into the delay
    h.executor.execute(cursor.clone()).await.unwrap();

    // the email node is deleted while the contact waits
    automation.nodes.retain(|n| n.id != NodeId::new("send"));
    h.automations.insert(automation.clone());

    h.clock.advance(Duration::seconds(60));
    let woken = current(&h, &cursor).await;
    h.executor.execute(woken).await.unwrap();

    let exited = current(&h, &cursor).await;
    assert_eq!(exited.status, ContactAutomationStatus::Exited);
    assert_eq!(exited.exit_reason.as_deref(), Some(end_reason::NODE_DELETED));
    assert_eq!(exited.current_node_id, None);
    assert_eq!(h.stats.stats(&automation.id).exited, 1);

    let ends = h.timeline.entries();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].kind, end_reason::NODE_DELETED);
}

#[tokio::test]
async fn paused_automation_freezes_the_contact_without_exiting() {
    let h = harness();
    let workspace_id = WorkspaceId::new();
    let mut automation = welcome_automation(workspace_id);
    automation.status = AutomationStatus::Paused;
    let cursor = seed(&h, &automation, "eve@example.com");

    h.executor.execute(cursor.clone()).await.unwrap();

    let frozen = current(&h, &cursor).await;
    assert_eq!(frozen.status, ContactAutomationStatus::Active);
    assert_eq!(frozen.current_node_id, Some(NodeId::new("trigger")));
    assert!(h.executions.all().is_empty());
    assert!(h.timeline.entries().is_empty());
}

#[tokio::test]
async fn loop_advances_exactly_ten_nodes_per_invocation() {
    let h = harness();
    let workspace_id = WorkspaceId::new();

    // trigger plus a chain of 14 zero-second delays
    let mut nodes = vec![Node {
        id: NodeId::new("trigger"),
        config: NodeConfig::Trigger {
            next: Some(NodeId::new("d1")),
        },
    }];
    for i in 1..=14 {
        let next = if i < 14 {
            Some(NodeId::new(format!("d{}", i + 1)))
        } else {
            None
        };
        nodes.push(Node {
            id: NodeId::new(format!("d{i}")),
            config: NodeConfig::Delay { seconds: 0, next },
        });
    }
    let now = Utc::now();
    let automation = Automation {
        id: AutomationId::new(),
        workspace_id,
        name: "long-chain".into(),
        status: AutomationStatus::Live,
        list_id: None,
        nodes,
        created_at: now,
        updated_at: now,
    };
    let cursor = seed(&h, &automation, "carol@example.com");

    h.executor.execute(cursor.clone()).await.unwrap();

    // ten executions: the trigger and d1..d9
    assert_eq!(h.executions.all().len(), 10);
    let parked = current(&h, &cursor).await;
    assert_eq!(parked.status, ContactAutomationStatus::Active);
    assert_eq!(parked.current_node_id, Some(NodeId::new("d10")));

    // the next tick finishes the chain
    h.executor.execute(parked).await.unwrap();
    let done = current(&h, &cursor).await;
    assert_eq!(done.status, ContactAutomationStatus::Completed);
    assert_eq!(h.executions.all().len(), 15);
}

/// Email-node stand-in that fails every attempt with a transient error.
struct AlwaysFailingEmail;

#[async_trait]
impl NodeExecutor for AlwaysFailingEmail {
    fn node_type(&self) -> &'static str {
        node_type::EMAIL
    }

    async fn execute(&self, _ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        Err(NodeError::Retryable(anyhow!("connection reset by provider")))
    }
}

#[tokio::test]
async fn transient_errors_back_off_then_exhaust_into_failed() {
    let h = harness_with_registry(|_| {
        let mut registry = NodeExecutorRegistry::new();
        registry
            .register(Arc::new(automation::nodes::TriggerExecutor))
            .register(Arc::new(automation::nodes::DelayExecutor))
            .register(Arc::new(AlwaysFailingEmail));
        registry
    });
    let workspace_id = WorkspaceId::new();
    let mut automation = welcome_automation(workspace_id);
    // drop the delay so the email is hit immediately after the trigger
    automation.nodes[0] = Node {
        id: NodeId::new("trigger"),
        config: NodeConfig::Trigger {
            next: Some(NodeId::new("send")),
        },
    };
    automation.nodes.retain(|n| n.id != NodeId::new("wait"));
    let cursor = seed(&h, &automation, "dan@example.com");
    let t0 = h.clock.now();

    // attempt 1: scheduled_at moves to +1m
    assert!(h.executor.execute(cursor.clone()).await.is_err());
    let c = current(&h, &cursor).await;
    assert_eq!(c.status, ContactAutomationStatus::Active);
    assert_eq!(c.retry_count, 1);
    assert_eq!(c.scheduled_at, Some(t0 + Duration::minutes(1)));
    assert_eq!(c.current_node_id, Some(NodeId::new("send")));

    // attempt 2 at +1m: +2m backoff
    h.clock.set(t0 + Duration::minutes(1));
    assert!(h.executor.execute(c).await.is_err());
    let c = current(&h, &cursor).await;
    assert_eq!(c.retry_count, 2);
    assert_eq!(c.scheduled_at, Some(t0 + Duration::minutes(1) + Duration::minutes(2)));

    // attempt 3: +4m backoff
    h.clock.set(t0 + Duration::minutes(3));
    assert!(h.executor.execute(c).await.is_err());
    let c = current(&h, &cursor).await;
    assert_eq!(c.retry_count, 3);
    assert_eq!(c.scheduled_at, Some(t0 + Duration::minutes(3) + Duration::minutes(4)));

    // attempt 4: retries exhausted, the cursor fails terminally
    h.clock.set(t0 + Duration::minutes(7));
    assert!(h.executor.execute(c).await.is_err());
    let c = current(&h, &cursor).await;
    assert_eq!(c.status, ContactAutomationStatus::Failed);
    assert!(c.last_error.as_deref().unwrap_or_default().contains("connection reset"));
    assert_eq!(c.current_node_id, None);

    let ends = h.timeline.entries();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].kind, end_reason::FAILED);
    assert_eq!(h.stats.stats(&automation.id).failed, 1);

    // every failed attempt left a failed execution row
    let failed_rows = h
        .executions
        .all()
        .into_iter()
        .filter(|e| e.action == NodeExecutionAction::Failed)
        .count();
    assert_eq!(failed_rows, 4);
}

#[tokio::test]
async fn unsupported_node_type_fails_immediately() {
    let h = harness_with_registry(|_| {
        let mut registry = NodeExecutorRegistry::new();
        registry.register(Arc::new(automation::nodes::TriggerExecutor));
        registry
    });
    let workspace_id = WorkspaceId::new();
    let automation = welcome_automation(workspace_id);
    let cursor = seed(&h, &automation, "frank@example.com");

    // trigger advances, then the delay node has no registered executor
    assert!(h.executor.execute(cursor.clone()).await.is_err());
    let c = current(&h, &cursor).await;
    assert_eq!(c.status, ContactAutomationStatus::Failed);
    assert_eq!(c.retry_count, 0, "fatal errors skip the retry machinery");
    assert_eq!(h.stats.stats(&automation.id).failed, 1);
}

#[tokio::test]
async fn completed_executions_satisfy_duration_invariant() {
    let h = harness();
    let workspace_id = WorkspaceId::new();
    let automation = welcome_automation(workspace_id);
    let cursor = seed(&h, &automation, "grace@example.com");

    h.executor.execute(cursor.clone()).await.unwrap();
    h.clock.advance(Duration::seconds(60));
    let woken = current(&h, &cursor).await;
    h.executor.execute(woken).await.unwrap();

    for execution in h.executions.all() {
        if execution.action == NodeExecutionAction::Completed {
            let completed_at = execution.completed_at.expect("completed without timestamp");
            assert!(completed_at >= execution.entered_at);
            assert_eq!(
                execution.duration_ms,
                Some((completed_at - execution.entered_at).num_milliseconds())
            );
        }
    }
}
