//! Contact profile model

use crate::types::WorkspaceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contact profile, keyed by email within a workspace
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contact {
    pub workspace_id: WorkspaceId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub country: Option<String>,
    pub language: Option<String>,
    pub timezone: Option<String>,
    /// Free-form profile attributes; segment predicates can reference them
    #[sqlx(json)]
    pub properties: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(workspace_id: WorkspaceId, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workspace_id,
            email: email.into(),
            first_name: None,
            last_name: None,
            country: None,
            language: None,
            timezone: None,
            properties: serde_json::Value::Object(serde_json::Map::new()),
            created_at: now,
            updated_at: now,
        }
    }
}
