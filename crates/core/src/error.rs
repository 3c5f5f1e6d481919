//! Error types for Flowmail core domain logic

use crate::types::{AutomationId, NodeId, SegmentId, TaskId};
use thiserror::Error;

/// Core domain errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Segment not found: {0}")]
    SegmentNotFound(SegmentId),

    #[error("Automation not found: {0}")]
    AutomationNotFound(AutomationId),

    #[error("Automation node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Invalid automation definition: {0}")]
    InvalidAutomation(String),

    #[error("Unknown email provider kind: {0}")]
    UnknownProviderKind(String),

    #[error("Unknown task kind: {0}")]
    UnknownTaskKind(String),
}

/// Result type alias for core domain operations
pub type CoreResult<T> = Result<T, CoreError>;
