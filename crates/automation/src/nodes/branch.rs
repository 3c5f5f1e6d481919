//! Branch node: two-way split on a compiled predicate.

use super::{NodeContext, NodeError, NodeExecutor, NodeOutcome};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use flowmail_core::models::{NodeConfig, node_type};
use flowmail_core::repository::SegmentRepository;
use serde_json::json;
use std::sync::Arc;

/// Evaluates the node's predicate against the contact through the segment
/// engine and follows the true or false successor.
pub struct BranchExecutor {
    segments: Arc<dyn SegmentRepository>,
}

impl BranchExecutor {
    pub fn new(segments: Arc<dyn SegmentRepository>) -> Self {
        Self { segments }
    }
}

#[async_trait]
impl NodeExecutor for BranchExecutor {
    fn node_type(&self) -> &'static str {
        node_type::BRANCH
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let NodeConfig::Branch {
            predicate,
            on_true,
            on_false,
        } = &ctx.node.config
        else {
            return Err(NodeError::Fatal(anyhow!(
                "node {} is not a branch node",
                ctx.node.id
            )));
        };

        let compiled = segment::compile(predicate)
            .map_err(|e| NodeError::Fatal(anyhow!("branch predicate does not compile: {e}")))?;

        let matched = self
            .segments
            .probe(
                &ctx.workspace_id,
                &compiled.sql,
                &compiled.args,
                &ctx.contact.email,
            )
            .await
            .context("failed to evaluate branch predicate")?;

        let next = if matched { on_true } else { on_false };
        Ok(NodeOutcome::advance(next.clone()).with_output(json!({ "matched": matched })))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil;
    use super::*;
    use chrono::Utc;
    use flowmail_core::memory::InMemorySegmentRepository;
    use flowmail_core::models::{DimensionFilter, FieldType, FilterOperator, Node, SegmentTree};
    use flowmail_core::types::{NodeId, WorkspaceId};
    use std::collections::HashMap;

    fn country_predicate() -> SegmentTree {
        SegmentTree::Leaf {
            filter: DimensionFilter {
                field: "country".into(),
                field_type: FieldType::String,
                operator: FilterOperator::Eq,
                values: vec![json!("NL")],
                case_sensitive: false,
            },
        }
    }

    #[tokio::test]
    async fn branch_follows_the_matching_successor() {
        let now = Utc::now();
        let workspace_id = WorkspaceId::new();
        let node = Node {
            id: NodeId::new("b1"),
            config: NodeConfig::Branch {
                predicate: country_predicate(),
                on_true: Some(NodeId::new("yes")),
                on_false: Some(NodeId::new("no")),
            },
        };
        let automation = testutil::automation_with(workspace_id, vec![node.clone()], None);
        let contact = testutil::contact(workspace_id, "a@example.com");
        let cursor = testutil::cursor_on(&automation, "a@example.com", &node.id, now);

        let segments = Arc::new(InMemorySegmentRepository::default());
        let compiled = segment::compile(&country_predicate()).unwrap();
        segments.set_matching(compiled.sql.clone(), &["a@example.com"]);

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

        let executor = BranchExecutor::new(Arc::clone(&segments) as Arc<dyn SegmentRepository>);
        let outcome = executor.execute(&ctx).await.unwrap();
        assert_eq!(outcome.next, Some(NodeId::new("yes")));
        assert_eq!(outcome.output["matched"], json!(true));

        segments.set_matching(compiled.sql, &[]);
        let outcome = executor.execute(&ctx).await.unwrap();
        assert_eq!(outcome.next, Some(NodeId::new("no")));
        assert_eq!(outcome.output["matched"], json!(false));
    }
}
