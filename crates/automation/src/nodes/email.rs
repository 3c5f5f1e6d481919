//! Email node: enqueues an outbound message for the sender process.

use super::{NodeContext, NodeError, NodeExecutor, NodeOutcome};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use flowmail_core::models::{NodeConfig, OutboundMessage, node_type};
use flowmail_core::repository::EmailQueue;
use flowmail_core::types::MessageId;
use serde_json::json;
use std::sync::Arc;

/// Hands the message to the email queue; a separate sender compiles the
/// template and dispatches through the provider adapter.
pub struct EmailExecutor {
    queue: Arc<dyn EmailQueue>,
}

impl EmailExecutor {
    pub fn new(queue: Arc<dyn EmailQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl NodeExecutor for EmailExecutor {
    fn node_type(&self) -> &'static str {
        node_type::EMAIL
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let NodeConfig::Email {
            template_id,
            integration_id,
            variables,
            next,
        } = &ctx.node.config
        else {
            return Err(NodeError::Fatal(anyhow!(
                "node {} is not an email node",
                ctx.node.id
            )));
        };

        let message = OutboundMessage {
            id: MessageId::new(),
            workspace_id: ctx.workspace_id,
            contact_email: ctx.contact.email.clone(),
            template_id: template_id.clone(),
            integration_id: *integration_id,
            variables: variables.clone(),
            created_at: ctx.now,
        };

        self.queue
            .enqueue(&message)
            .await
            .context("failed to enqueue outbound message")?;

        Ok(NodeOutcome::advance(next.clone()).with_output(json!({
            "message_id": message.id,
            "template_id": template_id,
            "integration_id": integration_id,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil;
    use super::*;
    use chrono::Utc;
    use flowmail_core::memory::InMemoryEmailQueue;
    use flowmail_core::models::Node;
    use flowmail_core::types::{IntegrationId, ListId, NodeId, WorkspaceId};
    use std::collections::HashMap;

    #[tokio::test]
    async fn email_node_enqueues_one_message_and_advances() {
        let now = Utc::now();
        let workspace_id = WorkspaceId::new();
        let integration_id = IntegrationId::new();
        let node = Node {
            id: NodeId::new("e1"),
            config: NodeConfig::Email {
                template_id: "welcome-1".into(),
                integration_id,
                variables: json!({"discount": 10}),
                next: Some(NodeId::new("done")),
            },
        };
        let automation =
            testutil::automation_with(workspace_id, vec![node.clone()], Some(ListId::new()));
        let contact = testutil::contact(workspace_id, "a@example.com");
        let cursor = testutil::cursor_on(&automation, "a@example.com", &node.id, now);
        let queue = Arc::new(InMemoryEmailQueue::default());

        let prior = HashMap::new();
        let ctx = NodeContext {
            workspace_id,
            automation: &automation,
            node: &node,
            contact: &contact,
            cursor: &cursor,
            prior_outputs: &prior,
            now,
        };

        let executor = EmailExecutor::new(Arc::clone(&queue) as Arc<dyn EmailQueue>);
        let outcome = executor.execute(&ctx).await.unwrap();

        let messages = queue.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].template_id, "welcome-1");
        assert_eq!(messages[0].integration_id, integration_id);
        assert_eq!(messages[0].contact_email, "a@example.com");
        assert_eq!(outcome.next, Some(NodeId::new("done")));
        assert_eq!(outcome.output["message_id"], json!(messages[0].id));
    }
}
