//! `process_contact_segment_queue` processor
//!
//! Permanent recurring drain of the incremental membership recheck queue.
//! Each iteration opens one drain transaction: claim the oldest rows,
//! probe every claimed contact against each active segment's compiled
//! predicate, stage the membership transitions, then delete the claimed
//! rows and commit. Any failure before the commit rolls the whole
//! iteration back, so the rows stay queued and the next run of the task
//! retries them.

use super::{Processor, ProcessorContext};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use flowmail_core::Clock;
use flowmail_core::models::{SegmentStatus, Task, task_kind};
use flowmail_core::repository::{ContactSegmentQueueRepository, SegmentRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Stop draining when this close to the deadline, in seconds.
const DEADLINE_MARGIN_SECS: i64 = 5;

/// Queue rows claimed per iteration.
const DRAIN_BATCH_SIZE: i64 = 100;

/// Idle wait when the queue is empty, budget permitting.
const EMPTY_QUEUE_WAIT: Duration = Duration::from_secs(10);

/// Breather between non-empty iterations.
const ITERATION_PAUSE: Duration = Duration::from_millis(100);

pub struct ProcessContactSegmentQueueProcessor {
    queue: Arc<dyn ContactSegmentQueueRepository>,
    segments: Arc<dyn SegmentRepository>,
    clock: Arc<dyn Clock>,
}

impl ProcessContactSegmentQueueProcessor {
    pub fn new(
        queue: Arc<dyn ContactSegmentQueueRepository>,
        segments: Arc<dyn SegmentRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            segments,
            clock,
        }
    }
}

#[async_trait]
impl Processor for ProcessContactSegmentQueueProcessor {
    fn handles(&self, kind: &str) -> bool {
        kind == task_kind::PROCESS_CONTACT_SEGMENT_QUEUE
    }

    async fn process(
        &self,
        ctx: &ProcessorContext,
        task: &mut Task,
        deadline: DateTime<Utc>,
    ) -> Result<bool> {
        let workspace_id = task.workspace_id;

        let margin = ChronoDuration::seconds(DEADLINE_MARGIN_SECS);
        loop {
            let now = self.clock.now();
            let remaining = deadline - now;
            if remaining <= margin || ctx.cancel.is_cancelled() {
                break;
            }

            let mut drain = self.queue.begin_drain(&workspace_id, DRAIN_BATCH_SIZE).await?;
            let entries = drain.entries().to_vec();
            if entries.is_empty() {
                drop(drain);
                // only sleep if the budget survives the full wait
                let wait = ChronoDuration::from_std(EMPTY_QUEUE_WAIT).unwrap_or(margin);
                if remaining > margin + wait {
                    tokio::select! {
                        () = ctx.cancel.cancelled() => break,
                        () = tokio::time::sleep(EMPTY_QUEUE_WAIT) => {}
                    }
                    continue;
                }
                break;
            }

            let all_segments = self.segments.get_segments(&workspace_id, false).await?;
            let active: Vec<_> = all_segments
                .iter()
                .filter(|s| s.status == SegmentStatus::Active)
                .filter(|s| s.compiled().is_some())
                .collect();
            debug!(
                contacts = entries.len(),
                segments = active.len(),
                "rechecking segment membership"
            );

            // every claimed row is evaluated before anything is deleted;
            // a failure abandons the transaction and the rows stay queued
            let mut aborted = false;
            'eval: for entry in &entries {
                for segment in &active {
                    let Some((sql, args)) = segment.compiled() else {
                        continue;
                    };
                    let result = match drain.probe(sql, args, &entry.email).await {
                        Ok(true) => {
                            drain
                                .add_contact(&segment.id, &entry.email, segment.version)
                                .await
                        }
                        Ok(false) => drain.remove_contact(&segment.id, &entry.email).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = result {
                        warn!(email = %entry.email, segment_id = %segment.id,
                            "membership recheck failed, rolling back the batch: {e}");
                        aborted = true;
                        break 'eval;
                    }
                }
            }

            if aborted {
                // rolled back; the rows stay queued and the next run of this
                // task retries them
                drop(drain);
                break;
            }
            if let Err(e) = drain.commit().await {
                warn!("queue drain commit failed, rows remain queued: {e}");
                break;
            }

            tokio::select! {
                () = ctx.cancel.cancelled() => break,
                () = tokio::time::sleep(ITERATION_PAUSE) => {}
            }
        }

        // permanent: never completes
        Ok(false)
    }
}
