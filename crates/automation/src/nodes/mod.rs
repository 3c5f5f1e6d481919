//! Node executors
//!
//! Each node type is handled by a pluggable capability registered in a
//! type-tag keyed registry. Adding a node type means registering a new
//! executor; the driving loop never matches on node types itself.

mod abtest;
mod branch;
mod delay;
mod email;
mod filter;
mod list;
#[cfg(test)]
mod testutil;
mod trigger;
mod webhook;

pub use abtest::AbtestExecutor;
pub use branch::BranchExecutor;
pub use delay::DelayExecutor;
pub use email::EmailExecutor;
pub use filter::FilterExecutor;
pub use list::{AddToListExecutor, RemoveFromListExecutor};
pub use trigger::TriggerExecutor;
pub use webhook::WebhookExecutor;

use anyhow::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowmail_core::models::{Automation, Contact, ContactAutomation, ContactAutomationStatus, Node};
use flowmail_core::repository::{ContactListRepository, EmailQueue, SegmentRepository};
use flowmail_core::types::{NodeId, WorkspaceId};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything an executor may look at while running one node.
pub struct NodeContext<'a> {
    pub workspace_id: WorkspaceId,
    pub automation: &'a Automation,
    pub node: &'a Node,
    pub contact: &'a Contact,
    pub cursor: &'a ContactAutomation,
    /// Outputs of previously completed nodes, keyed by node id
    pub prior_outputs: &'a HashMap<NodeId, serde_json::Value>,
    pub now: DateTime<Utc>,
}

/// What a node executor decided.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub next: Option<NodeId>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: ContactAutomationStatus,
    pub exit_reason: Option<String>,
    pub output: serde_json::Value,
}

impl NodeOutcome {
    /// Move straight on to `next`.
    pub fn advance(next: Option<NodeId>) -> Self {
        Self {
            next,
            scheduled_at: None,
            status: ContactAutomationStatus::Active,
            exit_reason: None,
            output: serde_json::json!({}),
        }
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = output;
        self
    }
}

/// Node execution failure, split by whether the retry machinery applies.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Transient or provider-semantic failure; the cursor backs off and
    /// retries up to its budget.
    #[error(transparent)]
    Retryable(#[from] Error),

    /// Logic failure (bad configuration, unsupported node); the cursor fails
    /// immediately.
    #[error("{0}")]
    Fatal(Error),
}

/// A pluggable handler for one node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// The type tag this executor is registered under.
    fn node_type(&self) -> &'static str;

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError>;
}

/// Type-tag keyed registry of node executors.
#[derive(Default, Clone)]
pub struct NodeExecutorRegistry {
    executors: HashMap<&'static str, Arc<dyn NodeExecutor>>,
}

impl NodeExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) -> &mut Self {
        self.executors.insert(executor.node_type(), executor);
        self
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }

    /// Registry with the built-in executor for every node type.
    pub fn with_defaults(
        segments: Arc<dyn SegmentRepository>,
        lists: Arc<dyn ContactListRepository>,
        email_queue: Arc<dyn EmailQueue>,
    ) -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(TriggerExecutor))
            .register(Arc::new(DelayExecutor))
            .register(Arc::new(EmailExecutor::new(email_queue)))
            .register(Arc::new(BranchExecutor::new(Arc::clone(&segments))))
            .register(Arc::new(FilterExecutor::new(segments)))
            .register(Arc::new(AddToListExecutor::new(Arc::clone(&lists))))
            .register(Arc::new(RemoveFromListExecutor::new(lists)))
            .register(Arc::new(AbtestExecutor))
            .register(Arc::new(WebhookExecutor::new()));
        registry
    }
}
