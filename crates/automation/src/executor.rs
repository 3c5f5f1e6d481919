//! Automation executor
//!
//! Drives one contact cursor through its automation graph, at most ten nodes
//! per invocation, persisting the cursor and the execution log after every
//! node so the loop can die anywhere without duplicating a step.

use crate::context::build_execution_context;
use crate::nodes::{NodeContext, NodeError, NodeExecutorRegistry};
use anyhow::{Result, anyhow};
use chrono::Duration;
use flowmail_core::Clock;
use flowmail_core::models::{
    AutomationStat, AutomationStatus, ContactAutomation, ContactAutomationStatus, NodeExecution,
    TimelineEntry, timeline_op,
};
use flowmail_core::repository::{
    AutomationRepository, AutomationStatsRepository, ContactAutomationRepository,
    ContactRepository, NodeExecutionRepository, TimelineRepository,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on nodes advanced in a single invocation.
const NODES_PER_TICK: usize = 10;

/// End reasons surfaced on the timeline.
pub mod end_reason {
    pub const COMPLETED: &str = "completed";
    pub const EXITED: &str = "exited";
    pub const FAILED: &str = "failed";
    pub const NODE_DELETED: &str = "automation_node_deleted";
}

/// Advances contact cursors through automation graphs.
pub struct AutomationExecutor {
    automations: Arc<dyn AutomationRepository>,
    cursors: Arc<dyn ContactAutomationRepository>,
    executions: Arc<dyn NodeExecutionRepository>,
    contacts: Arc<dyn ContactRepository>,
    timeline: Arc<dyn TimelineRepository>,
    stats: Arc<dyn AutomationStatsRepository>,
    registry: NodeExecutorRegistry,
    clock: Arc<dyn Clock>,
}

impl AutomationExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        automations: Arc<dyn AutomationRepository>,
        cursors: Arc<dyn ContactAutomationRepository>,
        executions: Arc<dyn NodeExecutionRepository>,
        contacts: Arc<dyn ContactRepository>,
        timeline: Arc<dyn TimelineRepository>,
        stats: Arc<dyn AutomationStatsRepository>,
        registry: NodeExecutorRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            automations,
            cursors,
            executions,
            contacts,
            timeline,
            stats,
            registry,
            clock,
        }
    }

    /// Run up to ten nodes for this cursor. State is durable at every exit.
    pub async fn execute(&self, mut cursor: ContactAutomation) -> Result<()> {
        let workspace_id = cursor.workspace_id;

        let automation = self
            .automations
            .get(&workspace_id, &cursor.automation_id)
            .await?
            .ok_or_else(|| anyhow!("automation {} not found", cursor.automation_id))?;

        // Not-live automations freeze their contacts in place.
        if automation.status != AutomationStatus::Live {
            debug!(
                automation_id = %automation.id,
                "automation is not live, leaving cursor frozen"
            );
            return Ok(());
        }

        if cursor.current_node_id.is_none() {
            cursor.status = ContactAutomationStatus::Completed;
            cursor.scheduled_at = None;
            cursor.updated_at = self.clock.now();
            self.cursors.update(&cursor).await?;
            return Ok(());
        }

        let contact = self
            .contacts
            .get(&workspace_id, &cursor.contact_email)
            .await?
            .ok_or_else(|| anyhow!("contact {} not found", cursor.contact_email))?;

        for _ in 0..NODES_PER_TICK {
            let now = self.clock.now();
            let node_id = cursor
                .current_node_id
                .clone()
                .ok_or_else(|| anyhow!("active cursor {} has no current node", cursor.id))?;

            let Some(node) = automation.node(&node_id) else {
                cursor.status = ContactAutomationStatus::Exited;
                cursor.exit_reason = Some(end_reason::NODE_DELETED.to_string());
                cursor.current_node_id = None;
                cursor.scheduled_at = None;
                cursor.updated_at = now;
                self.cursors.update(&cursor).await?;
                self.finish(&cursor, AutomationStat::Exited, end_reason::NODE_DELETED)
                    .await;
                return Ok(());
            };

            let mut execution = NodeExecution::begin(workspace_id, &cursor, node, now);
            self.executions.create(&execution).await?;

            let prior_outputs =
                build_execution_context(self.executions.as_ref(), &workspace_id, &cursor.id).await;

            let ctx = NodeContext {
                workspace_id,
                automation: &automation,
                node,
                contact: &contact,
                cursor: &cursor,
                prior_outputs: &prior_outputs,
                now,
            };

            let result = match self.registry.get(node.config.node_type()) {
                Some(executor) => executor.execute(&ctx).await,
                None => Err(NodeError::Fatal(anyhow!(
                    "unsupported node type {}",
                    node.config.node_type()
                ))),
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(err) => {
                    return self
                        .handle_node_error(cursor, execution, err, node.id.as_str())
                        .await;
                }
            };

            let now = self.clock.now();
            cursor.current_node_id = outcome.next.clone();
            cursor.scheduled_at = outcome.scheduled_at;
            cursor.status = if outcome.next.is_none()
                && outcome.status == ContactAutomationStatus::Active
            {
                ContactAutomationStatus::Completed
            } else {
                outcome.status
            };
            if cursor.status == ContactAutomationStatus::Exited {
                cursor.exit_reason = outcome
                    .exit_reason
                    .clone()
                    .or_else(|| Some(end_reason::EXITED.to_string()));
            }
            if cursor.status != ContactAutomationStatus::Active {
                cursor.current_node_id = None;
                cursor.scheduled_at = None;
            }
            // a successful advance restores the full retry budget
            cursor.retry_count = 0;
            cursor.updated_at = now;
            self.cursors.update(&cursor).await?;

            execution.complete(outcome.output, now);
            self.executions.update(&execution).await?;

            match cursor.status {
                ContactAutomationStatus::Completed => {
                    self.finish(&cursor, AutomationStat::Completed, end_reason::COMPLETED)
                        .await;
                    return Ok(());
                }
                ContactAutomationStatus::Exited => {
                    let reason = cursor
                        .exit_reason
                        .clone()
                        .unwrap_or_else(|| end_reason::EXITED.to_string());
                    self.finish(&cursor, AutomationStat::Exited, &reason).await;
                    return Ok(());
                }
                ContactAutomationStatus::Failed => {
                    self.finish(&cursor, AutomationStat::Failed, end_reason::FAILED)
                        .await;
                    return Ok(());
                }
                ContactAutomationStatus::Active => {
                    if cursor.scheduled_at.is_some_and(|at| at > now) {
                        // parked; the next tick resumes it
                        return Ok(());
                    }
                }
            }
        }

        // ten nodes advanced; remaining ones run next tick
        Ok(())
    }

    async fn handle_node_error(
        &self,
        mut cursor: ContactAutomation,
        mut execution: NodeExecution,
        err: NodeError,
        node_id: &str,
    ) -> Result<()> {
        let now = self.clock.now();
        execution.fail(err.to_string(), now);
        self.executions.update(&execution).await?;

        let exhausted = cursor.retry_count >= cursor.max_retries;
        let fatal = matches!(err, NodeError::Fatal(_));

        if fatal || exhausted {
            cursor.status = ContactAutomationStatus::Failed;
            cursor.last_error = Some(err.to_string());
            cursor.current_node_id = None;
            cursor.scheduled_at = None;
            cursor.updated_at = now;
            self.cursors.update(&cursor).await?;
            self.finish(&cursor, AutomationStat::Failed, end_reason::FAILED)
                .await;
        } else {
            // 1, 2, 4, 8, ... minutes
            let backoff_minutes = 1i64 << cursor.retry_count.min(16);
            cursor.scheduled_at = Some(now + Duration::minutes(backoff_minutes));
            cursor.retry_count += 1;
            cursor.last_retry_at = Some(now);
            cursor.last_error = Some(err.to_string());
            cursor.updated_at = now;
            self.cursors.update(&cursor).await?;
        }

        Err(anyhow!(err).context(format!("node {node_id} failed")))
    }

    /// Bump the automation counter and emit the `automation.end` timeline
    /// event. Both are best-effort.
    async fn finish(&self, cursor: &ContactAutomation, stat: AutomationStat, reason: &str) {
        if let Err(e) = self
            .stats
            .increment(&cursor.workspace_id, &cursor.automation_id, stat)
            .await
        {
            warn!(automation_id = %cursor.automation_id, "failed to bump automation stat: {e}");
        }

        let entry = TimelineEntry {
            workspace_id: cursor.workspace_id,
            email: cursor.contact_email.clone(),
            operation: timeline_op::AUTOMATION_END.to_string(),
            entity_type: "automation".to_string(),
            kind: reason.to_string(),
            entity_id: cursor.automation_id.0,
            changes: json!({
                "reason": reason,
                "contact_automation_id": cursor.id,
            }),
            created_at: self.clock.now(),
        };
        if let Err(e) = self.timeline.create(&entry).await {
            warn!(automation_id = %cursor.automation_id, "failed to write timeline event: {e}");
        }
    }
}
