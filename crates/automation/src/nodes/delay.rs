//! Delay node: parks the contact until a future wake time.

use super::{NodeContext, NodeError, NodeExecutor, NodeOutcome};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Duration;
use flowmail_core::models::{NodeConfig, node_type};
use serde_json::json;

/// Schedules the cursor `seconds` into the future and points it at the sole
/// successor.
pub struct DelayExecutor;

#[async_trait]
impl NodeExecutor for DelayExecutor {
    fn node_type(&self) -> &'static str {
        node_type::DELAY
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let NodeConfig::Delay { seconds, next } = &ctx.node.config else {
            return Err(NodeError::Fatal(anyhow!(
                "node {} is not a delay node",
                ctx.node.id
            )));
        };
        if *seconds < 0 {
            return Err(NodeError::Fatal(anyhow!(
                "delay node {} has a negative duration",
                ctx.node.id
            )));
        }

        let wake_at = ctx.now + Duration::seconds(*seconds);
        Ok(NodeOutcome {
            scheduled_at: Some(wake_at),
            ..NodeOutcome::advance(next.clone())
        }
        .with_output(json!({ "delay_seconds": seconds, "wake_at": wake_at })))
    }
}
