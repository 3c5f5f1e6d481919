//! Trigger node: the entry point of every automation.

use super::{NodeContext, NodeError, NodeExecutor, NodeOutcome};
use anyhow::anyhow;
use async_trait::async_trait;
use flowmail_core::models::{NodeConfig, node_type};

/// Passes the contact straight through to the trigger's successor.
pub struct TriggerExecutor;

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    fn node_type(&self) -> &'static str {
        node_type::TRIGGER
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let NodeConfig::Trigger { next } = &ctx.node.config else {
            return Err(NodeError::Fatal(anyhow!(
                "node {} is not a trigger node",
                ctx.node.id
            )));
        };
        Ok(NodeOutcome::advance(next.clone()))
    }
}
