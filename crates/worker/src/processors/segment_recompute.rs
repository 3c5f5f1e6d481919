//! `check_segment_recompute` processor
//!
//! Permanent recurring task that turns due recompute schedules into
//! `build_segment` tasks. Creation failures are logged and skipped; the
//! outer task never fails.

use super::{Processor, ProcessorContext};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowmail_core::Clock;
use flowmail_core::models::{Task, task_kind};
use flowmail_core::repository::{SegmentRepository, TaskRepository};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound on build tasks created per tick.
const MAX_SEGMENTS_PER_TICK: i64 = 100;

/// Batch size seeded into created build tasks.
const SEEDED_BATCH_SIZE: i64 = 100;

pub struct CheckSegmentRecomputeProcessor {
    segments: Arc<dyn SegmentRepository>,
    tasks: Arc<dyn TaskRepository>,
    clock: Arc<dyn Clock>,
}

impl CheckSegmentRecomputeProcessor {
    pub fn new(
        segments: Arc<dyn SegmentRepository>,
        tasks: Arc<dyn TaskRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            segments,
            tasks,
            clock,
        }
    }
}

#[async_trait]
impl Processor for CheckSegmentRecomputeProcessor {
    fn handles(&self, kind: &str) -> bool {
        kind == task_kind::CHECK_SEGMENT_RECOMPUTE
    }

    async fn process(
        &self,
        _ctx: &ProcessorContext,
        task: &mut Task,
        _deadline: DateTime<Utc>,
    ) -> Result<bool> {
        let workspace_id = task.workspace_id;
        let now = self.clock.now();

        let due = self
            .segments
            .due_for_recompute(&workspace_id, MAX_SEGMENTS_PER_TICK, now)
            .await?;

        for mut segment in due {
            let build = Task::new(
                workspace_id,
                task_kind::BUILD_SEGMENT,
                json!({
                    "segment_id": segment.id,
                    "version": segment.version + 1,
                    "batch_size": SEEDED_BATCH_SIZE,
                }),
            );
            if let Err(e) = self.tasks.create(&build).await {
                warn!(segment_id = %segment.id, "failed to create build task, skipping: {e}");
                continue;
            }
            info!(segment_id = %segment.id, version = segment.version + 1, "queued segment rebuild");

            // push the schedule forward so the next tick does not enqueue
            // the same segment again
            segment.recompute_after = segment
                .recompute_interval_hours
                .map(|hours| now + Duration::hours(hours));
            if let Err(e) = self.segments.update(&segment).await {
                warn!(segment_id = %segment.id, "failed to advance recompute schedule: {e}");
            }
        }

        // permanent: never completes
        Ok(false)
    }
}
