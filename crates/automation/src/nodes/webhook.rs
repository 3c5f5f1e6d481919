//! Webhook node: fires an HTTP call with a payload derived from the
//! execution context.

use super::{NodeContext, NodeError, NodeExecutor, NodeOutcome};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use flowmail_core::models::{NodeConfig, node_type};
use serde_json::json;
use std::time::Duration;
use url::Url;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts a JSON payload to the configured URL; any non-2xx response is a
/// node error and goes through the retry machinery.
pub struct WebhookExecutor {
    client: reqwest::Client,
}

impl WebhookExecutor {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for WebhookExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for WebhookExecutor {
    fn node_type(&self) -> &'static str {
        node_type::WEBHOOK
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let NodeConfig::Webhook { url, payload, next } = &ctx.node.config else {
            return Err(NodeError::Fatal(anyhow!(
                "node {} is not a webhook node",
                ctx.node.id
            )));
        };

        let url = Url::parse(url).map_err(|e| {
            NodeError::Fatal(anyhow!("webhook node {} has an invalid url: {e}", ctx.node.id))
        })?;

        let body = json!({
            "workspace_id": ctx.workspace_id,
            "automation_id": ctx.automation.id,
            "node_id": ctx.node.id,
            "contact_email": ctx.contact.email,
            "payload": payload,
            "context": ctx.prior_outputs,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::Retryable(anyhow!(
                "webhook returned status {status}"
            )));
        }

        Ok(NodeOutcome::advance(next.clone())
            .with_output(json!({ "status": status.as_u16() })))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil;
    use super::*;
    use chrono::Utc;
    use flowmail_core::models::Node;
    use flowmail_core::types::{NodeId, WorkspaceId};
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn webhook_node(url: String) -> Node {
        Node {
            id: NodeId::new("w1"),
            config: NodeConfig::Webhook {
                url,
                payload: json!({"source": "automation"}),
                next: Some(NodeId::new("after")),
            },
        }
    }

    #[tokio::test]
    async fn webhook_posts_context_and_advances_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/crm"))
            .and(body_partial_json(json!({
                "contact_email": "a@example.com",
                "payload": {"source": "automation"},
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let now = Utc::now();
        let workspace_id = WorkspaceId::new();
        let node = webhook_node(format!("{}/hooks/crm", server.uri()));
        let automation = testutil::automation_with(workspace_id, vec![node.clone()], None);
        let contact = testutil::contact(workspace_id, "a@example.com");
        let cursor = testutil::cursor_on(&automation, "a@example.com", &node.id, now);

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

        let outcome = WebhookExecutor::new().execute(&ctx).await.unwrap();
        assert_eq!(outcome.next, Some(NodeId::new("after")));
        assert_eq!(outcome.output["status"], json!(200));
    }

    #[tokio::test]
    async fn non_2xx_is_a_retryable_node_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let now = Utc::now();
        let workspace_id = WorkspaceId::new();
        let node = webhook_node(server.uri());
        let automation = testutil::automation_with(workspace_id, vec![node.clone()], None);
        let contact = testutil::contact(workspace_id, "a@example.com");
        let cursor = testutil::cursor_on(&automation, "a@example.com", &node.id, now);
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

        let err = WebhookExecutor::new().execute(&ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Retryable(_)));
    }

    #[tokio::test]
    async fn invalid_url_is_fatal() {
        let now = Utc::now();
        let workspace_id = WorkspaceId::new();
        let node = webhook_node("not a url".into());
        let automation = testutil::automation_with(workspace_id, vec![node.clone()], None);
        let contact = testutil::contact(workspace_id, "a@example.com");
        let cursor = testutil::cursor_on(&automation, "a@example.com", &node.id, now);
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

        let err = WebhookExecutor::new().execute(&ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }
}
