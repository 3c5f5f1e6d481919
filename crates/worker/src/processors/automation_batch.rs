//! `execute_automation_batch` processor
//!
//! Claims due contact-automation cursors and hands each to the automation
//! executor. A per-contact failure is logged and does not abort the batch.

use super::{Processor, ProcessorContext};
use anyhow::{Context, Result};
use async_trait::async_trait;
use automation::AutomationExecutor;
use chrono::{DateTime, Utc};
use flowmail_core::Clock;
use flowmail_core::models::{ExecuteAutomationBatchState, Task, task_kind};
use flowmail_core::repository::ContactAutomationRepository;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ExecuteAutomationBatchProcessor {
    cursors: Arc<dyn ContactAutomationRepository>,
    executor: Arc<AutomationExecutor>,
    clock: Arc<dyn Clock>,
}

impl ExecuteAutomationBatchProcessor {
    pub fn new(
        cursors: Arc<dyn ContactAutomationRepository>,
        executor: Arc<AutomationExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cursors,
            executor,
            clock,
        }
    }
}

#[async_trait]
impl Processor for ExecuteAutomationBatchProcessor {
    fn handles(&self, kind: &str) -> bool {
        kind == task_kind::EXECUTE_AUTOMATION_BATCH
    }

    async fn process(
        &self,
        _ctx: &ProcessorContext,
        task: &mut Task,
        _deadline: DateTime<Utc>,
    ) -> Result<bool> {
        let workspace_id = task.workspace_id;
        let state: ExecuteAutomationBatchState = serde_json::from_value(task.state.clone())
            .context("invalid execute_automation_batch task state")?;

        let due = self
            .cursors
            .claim_due(&workspace_id, state.batch_size, self.clock.now())
            .await?;
        if due.is_empty() {
            return Ok(false);
        }

        debug!(count = due.len(), "executing automation batch");
        for cursor in due {
            let cursor_id = cursor.id;
            if let Err(e) = self.executor.execute(cursor).await {
                warn!(contact_automation_id = %cursor_id, "automation step failed: {e:#}");
            }
        }

        // recurring: the runner re-queues us a second from now
        Ok(false)
    }
}
