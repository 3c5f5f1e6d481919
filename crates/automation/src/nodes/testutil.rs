//! Shared fixtures for node executor tests.

use chrono::{DateTime, Utc};
use flowmail_core::models::{
    Automation, AutomationStatus, Contact, ContactAutomation, ContactAutomationStatus, Node,
};
use flowmail_core::types::{ContactAutomationId, ListId, NodeId, WorkspaceId};

pub fn automation_with(
    workspace_id: WorkspaceId,
    nodes: Vec<Node>,
    list_id: Option<ListId>,
) -> Automation {
    let now = Utc::now();
    Automation {
        id: flowmail_core::types::AutomationId::new(),
        workspace_id,
        name: "fixture".into(),
        status: AutomationStatus::Live,
        list_id,
        nodes,
        created_at: now,
        updated_at: now,
    }
}

pub fn cursor_on(
    automation: &Automation,
    email: &str,
    node_id: &NodeId,
    now: DateTime<Utc>,
) -> ContactAutomation {
    ContactAutomation {
        id: ContactAutomationId::new(),
        workspace_id: automation.workspace_id,
        automation_id: automation.id,
        contact_email: email.to_string(),
        current_node_id: Some(node_id.clone()),
        status: ContactAutomationStatus::Active,
        scheduled_at: None,
        exit_reason: None,
        retry_count: 0,
        max_retries: 3,
        last_error: None,
        last_retry_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn contact(workspace_id: WorkspaceId, email: &str) -> Contact {
    Contact::new(workspace_id, email)
}
