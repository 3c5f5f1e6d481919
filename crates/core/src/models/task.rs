//! Durable task model
//!
//! A task row is the unit of work the runner claims and dispatches. The task
//! kind is a free-form tag; the payload is a JSON document the matching
//! processor deserializes into its own state struct.

use crate::error::CoreError;
use crate::types::{SegmentId, TaskId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task kind tags understood by the built-in processors.
pub mod task_kind {
    pub const BUILD_SEGMENT: &str = "build_segment";
    pub const CHECK_SEGMENT_RECOMPUTE: &str = "check_segment_recompute";
    pub const PROCESS_CONTACT_SEGMENT_QUEUE: &str = "process_contact_segment_queue";
    pub const EXECUTE_AUTOMATION_BATCH: &str = "execute_automation_batch";

    /// Kinds whose processor never reports completion; the runner re-queues
    /// them immediately with progress reset.
    pub const PERMANENT: &[&str] = &[CHECK_SEGMENT_RECOMPUTE, PROCESS_CONTACT_SEGMENT_QUEUE];
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

/// Durable unit of work
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: TaskId,
    pub workspace_id: WorkspaceId,
    /// Free-form type tag, e.g. `build_segment`
    pub kind: String,
    pub status: TaskStatus,
    /// Completion fraction in [0, 1], monotone within a run
    pub progress: f64,
    /// Per-kind payload; processors deserialize this into their state struct
    #[sqlx(json)]
    pub state: serde_json::Value,
    /// Human-readable progress message
    pub message: Option<String>,
    /// Wall-clock budget per run; the runner defaults to 50s when unset
    pub max_runtime_seconds: Option<i64>,
    pub max_retries: i32,
    pub retry_count: i32,
    pub retry_interval_seconds: i64,
    /// Absolute earliest run time; null means immediately
    pub next_run_after: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a pending task with default budgets.
    pub fn new(workspace_id: WorkspaceId, kind: impl Into<String>, state: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            workspace_id,
            kind: kind.into(),
            status: TaskStatus::Pending,
            progress: 0.0,
            state,
            message: None,
            max_runtime_seconds: None,
            max_retries: 3,
            retry_count: 0,
            retry_interval_seconds: 60,
            next_run_after: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate budgets before the task is persisted.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.kind.trim().is_empty() {
            return Err(CoreError::InvalidTask("kind must not be empty".into()));
        }
        if self.max_runtime_seconds == Some(0) {
            return Err(CoreError::InvalidTask(
                "max_runtime_seconds must be positive".into(),
            ));
        }
        if self.max_runtime_seconds.is_some_and(|s| s < 0) {
            return Err(CoreError::InvalidTask(
                "max_runtime_seconds must be positive".into(),
            ));
        }
        if self.max_retries < 0 {
            return Err(CoreError::InvalidTask(
                "max_retries must not be negative".into(),
            ));
        }
        if self.retry_interval_seconds < 1 {
            return Err(CoreError::InvalidTask(
                "retry_interval_seconds must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Whether this task's processor never completes (see `task_kind::PERMANENT`).
    pub fn is_permanent(&self) -> bool {
        task_kind::PERMANENT.contains(&self.kind.as_str())
    }
}

/// Filter for listing tasks
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub kind: Option<String>,
}

fn default_build_batch_size() -> i64 {
    1000
}

/// Payload of a `build_segment` task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSegmentState {
    pub segment_id: SegmentId,
    pub version: i64,
    #[serde(default = "default_build_batch_size")]
    pub batch_size: i64,
    /// Last contact email processed; scans resume after it
    #[serde(default)]
    pub cursor: Option<String>,
    /// Contacts evaluated so far, for progress reporting
    #[serde(default)]
    pub processed: i64,
}

fn default_automation_batch_size() -> i64 {
    50
}

/// Payload of an `execute_automation_batch` task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteAutomationBatchState {
    #[serde(default = "default_automation_batch_size")]
    pub batch_size: i64,
}
