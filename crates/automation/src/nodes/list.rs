//! List membership nodes.

use super::{NodeContext, NodeError, NodeExecutor, NodeOutcome};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use flowmail_core::models::{NodeConfig, node_type};
use flowmail_core::repository::ContactListRepository;
use serde_json::json;
use std::sync::Arc;

/// Adds the contact to a static list. Idempotent.
pub struct AddToListExecutor {
    lists: Arc<dyn ContactListRepository>,
}

impl AddToListExecutor {
    pub fn new(lists: Arc<dyn ContactListRepository>) -> Self {
        Self { lists }
    }
}

#[async_trait]
impl NodeExecutor for AddToListExecutor {
    fn node_type(&self) -> &'static str {
        node_type::ADD_TO_LIST
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let NodeConfig::AddToList { list_id, next } = &ctx.node.config else {
            return Err(NodeError::Fatal(anyhow!(
                "node {} is not an add_to_list node",
                ctx.node.id
            )));
        };

        self.lists
            .add(&ctx.workspace_id, list_id, &ctx.contact.email)
            .await
            .context("failed to add contact to list")?;

        Ok(NodeOutcome::advance(next.clone()).with_output(json!({ "list_id": list_id })))
    }
}

/// Removes the contact from a static list. Idempotent.
pub struct RemoveFromListExecutor {
    lists: Arc<dyn ContactListRepository>,
}

impl RemoveFromListExecutor {
    pub fn new(lists: Arc<dyn ContactListRepository>) -> Self {
        Self { lists }
    }
}

#[async_trait]
impl NodeExecutor for RemoveFromListExecutor {
    fn node_type(&self) -> &'static str {
        node_type::REMOVE_FROM_LIST
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let NodeConfig::RemoveFromList { list_id, next } = &ctx.node.config else {
            return Err(NodeError::Fatal(anyhow!(
                "node {} is not a remove_from_list node",
                ctx.node.id
            )));
        };

        self.lists
            .remove(&ctx.workspace_id, list_id, &ctx.contact.email)
            .await
            .context("failed to remove contact from list")?;

        Ok(NodeOutcome::advance(next.clone()).with_output(json!({ "list_id": list_id })))
    }
}
