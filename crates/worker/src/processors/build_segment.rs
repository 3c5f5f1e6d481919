//! `build_segment` processor
//!
//! One-shot, long-running full rebuild of a segment's membership at a new
//! version. Scans contacts in email order, checkpointing its cursor every
//! batch so an out-of-budget run resumes where it left off.

use super::{FatalTaskError, Processor, ProcessorContext};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowmail_core::Clock;
use flowmail_core::models::{BuildSegmentState, SegmentStatus, Task, task_kind};
use flowmail_core::repository::{ContactRepository, SegmentRepository, TaskRepository};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Stop and checkpoint when this close to the deadline, in seconds.
const DEADLINE_MARGIN_SECS: i64 = 5;

pub struct BuildSegmentProcessor {
    segments: Arc<dyn SegmentRepository>,
    contacts: Arc<dyn ContactRepository>,
    tasks: Arc<dyn TaskRepository>,
    clock: Arc<dyn Clock>,
}

impl BuildSegmentProcessor {
    pub fn new(
        segments: Arc<dyn SegmentRepository>,
        contacts: Arc<dyn ContactRepository>,
        tasks: Arc<dyn TaskRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            segments,
            contacts,
            tasks,
            clock,
        }
    }
}

#[async_trait]
impl Processor for BuildSegmentProcessor {
    fn handles(&self, kind: &str) -> bool {
        kind == task_kind::BUILD_SEGMENT
    }

    async fn process(
        &self,
        ctx: &ProcessorContext,
        task: &mut Task,
        deadline: DateTime<Utc>,
    ) -> Result<bool> {
        let workspace_id = task.workspace_id;
        let mut state: BuildSegmentState = serde_json::from_value(task.state.clone())
            .context("invalid build_segment task state")?;

        let Some(mut segment) = self.segments.get(&workspace_id, &state.segment_id).await? else {
            return Err(anyhow!(FatalTaskError(format!(
                "segment {} not found",
                state.segment_id
            ))));
        };

        if segment.status != SegmentStatus::Building {
            segment.status = SegmentStatus::Building;
            self.segments.update(&segment).await?;
        }

        // compilation failure is fatal: the tree itself is broken
        let compiled = segment::compile(&segment.tree).map_err(|e| {
            anyhow!(FatalTaskError(format!(
                "segment {} does not compile: {e}",
                segment.id
            )))
        })?;
        segment.generated_sql = Some(compiled.sql.clone());
        segment.generated_args = Some(json!(compiled.args));
        self.segments.update(&segment).await?;

        let total = self.contacts.count(&workspace_id).await?.max(1);

        loop {
            let batch = self
                .contacts
                .list_batch(&workspace_id, state.cursor.as_deref(), state.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }

            let emails: Vec<String> = batch.into_iter().map(|c| c.email).collect();
            let matched: HashSet<String> = self
                .segments
                .filter_matching(&workspace_id, &compiled.sql, &compiled.args, &emails)
                .await?
                .into_iter()
                .collect();

            for email in &emails {
                if matched.contains(email) {
                    self.segments
                        .add_contact(&workspace_id, &segment.id, email, state.version)
                        .await?;
                } else {
                    self.segments
                        .remove_contact(&workspace_id, &segment.id, email)
                        .await?;
                }
            }

            state.processed += emails.len() as i64;
            state.cursor = emails.last().cloned();
            task.progress = (state.processed as f64 / total as f64).min(1.0);
            task.state = serde_json::to_value(&state)?;
            self.tasks
                .save_state(&workspace_id, &task.id, task.progress, &task.state)
                .await?;

            let now = self.clock.now();
            if deadline - now <= chrono::Duration::seconds(DEADLINE_MARGIN_SECS)
                || ctx.cancel.is_cancelled()
            {
                // cursor is checkpointed; the runner re-queues us
                return Ok(false);
            }
        }

        self.segments
            .remove_old_memberships(&workspace_id, &segment.id, state.version)
            .await?;
        segment.version = state.version;
        segment.status = SegmentStatus::Active;
        self.segments.update(&segment).await?;

        task.progress = 1.0;
        info!(
            segment_id = %segment.id,
            version = state.version,
            contacts = state.processed,
            "segment rebuild complete"
        );
        Ok(true)
    }
}
