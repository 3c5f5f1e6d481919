//! Contact timeline entries

use crate::types::WorkspaceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known timeline operations emitted by the execution fabric.
pub mod timeline_op {
    pub const AUTOMATION_END: &str = "automation.end";
}

/// One event on a contact's timeline
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimelineEntry {
    pub workspace_id: WorkspaceId,
    pub email: String,
    pub operation: String,
    pub entity_type: String,
    /// Operation-specific qualifier, e.g. the end reason of an automation
    pub kind: String,
    pub entity_id: Uuid,
    #[sqlx(json)]
    pub changes: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
