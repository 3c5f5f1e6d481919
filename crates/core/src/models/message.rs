//! Outbound message and template compilation contracts

use crate::types::{IntegrationId, MessageId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message handed to the email queue by the email node executor.
///
/// The queue is drained by a separate sender process that compiles the
/// template and calls the provider dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub workspace_id: WorkspaceId,
    pub contact_email: String,
    pub template_id: String,
    pub integration_id: IntegrationId,
    #[sqlx(json)]
    pub variables: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Input to the template compiler collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileTemplateRequest {
    pub workspace_id: WorkspaceId,
    pub message_id: MessageId,
    pub template_id: String,
    pub data: serde_json::Value,
    pub tracking_enabled: bool,
}

/// Output of the template compiler collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileTemplateResult {
    pub success: bool,
    pub html: Option<String>,
    pub error: Option<String>,
}
