//! Task processors
//!
//! A processor is a pluggable handler registered against a task kind. The
//! runner hands it the claimed task and a deadline; the processor reports
//! completion (`true`), partial progress (`false`), or an error.

mod automation_batch;
mod build_segment;
mod segment_queue;
mod segment_recompute;

pub use automation_batch::ExecuteAutomationBatchProcessor;
pub use build_segment::BuildSegmentProcessor;
pub use segment_queue::ProcessContactSegmentQueueProcessor;
pub use segment_recompute::CheckSegmentRecomputeProcessor;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowmail_core::models::Task;
use flowmail_core::types::WorkspaceId;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Ambient state handed to a processor invocation.
pub struct ProcessorContext {
    pub workspace_id: WorkspaceId,
    /// Cancelled when the runner is stopping; processors must return
    /// promptly once it fires.
    pub cancel: CancellationToken,
}

/// Pluggable task handler.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Whether this processor accepts tasks of the given kind.
    fn handles(&self, kind: &str) -> bool;

    /// Work on the task until done, out of budget, or failed.
    ///
    /// `Ok(true)` completes the task; `Ok(false)` re-queues it (immediately
    /// for permanent kinds, after one second otherwise). Errors go through
    /// the retry budget unless they carry a [`FatalTaskError`].
    async fn process(
        &self,
        ctx: &ProcessorContext,
        task: &mut Task,
        deadline: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Marker for task failures that must not be retried. The runner exhausts
/// the retry budget on sight.
#[derive(Debug)]
pub struct FatalTaskError(pub String);

impl fmt::Display for FatalTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for FatalTaskError {}
