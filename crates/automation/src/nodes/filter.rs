//! Filter node: gate that exits contacts the predicate does not match.

use super::{NodeContext, NodeError, NodeExecutor, NodeOutcome};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use flowmail_core::models::{ContactAutomationStatus, NodeConfig, node_type};
use flowmail_core::repository::SegmentRepository;
use serde_json::json;
use std::sync::Arc;

pub const FILTER_EXCLUDED: &str = "filter_excluded";

/// Lets matching contacts through; non-matching contacts leave the
/// automation with reason `filter_excluded`.
pub struct FilterExecutor {
    segments: Arc<dyn SegmentRepository>,
}

impl FilterExecutor {
    pub fn new(segments: Arc<dyn SegmentRepository>) -> Self {
        Self { segments }
    }
}

#[async_trait]
impl NodeExecutor for FilterExecutor {
    fn node_type(&self) -> &'static str {
        node_type::FILTER
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let NodeConfig::Filter { predicate, next } = &ctx.node.config else {
            return Err(NodeError::Fatal(anyhow!(
                "node {} is not a filter node",
                ctx.node.id
            )));
        };

        let compiled = segment::compile(predicate)
            .map_err(|e| NodeError::Fatal(anyhow!("filter predicate does not compile: {e}")))?;

        let matched = self
            .segments
            .probe(
                &ctx.workspace_id,
                &compiled.sql,
                &compiled.args,
                &ctx.contact.email,
            )
            .await
            .context("failed to evaluate filter predicate")?;

        if matched {
            Ok(NodeOutcome::advance(next.clone()).with_output(json!({ "matched": true })))
        } else {
            Ok(NodeOutcome {
                next: None,
                scheduled_at: None,
                status: ContactAutomationStatus::Exited,
                exit_reason: Some(FILTER_EXCLUDED.to_string()),
                output: json!({ "matched": false }),
            })
        }
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

    #[tokio::test]
    async fn non_matching_contact_exits_with_filter_excluded() {
        let now = Utc::now();
        let workspace_id = WorkspaceId::new();
        let predicate = SegmentTree::Leaf {
            filter: DimensionFilter {
                field: "plan".into(),
                field_type: FieldType::String,
                operator: FilterOperator::Eq,
                values: vec![json!("pro")],
                case_sensitive: false,
            },
        };
        let node = Node {
            id: NodeId::new("f1"),
            config: NodeConfig::Filter {
                predicate: predicate.clone(),
                next: Some(NodeId::new("after")),
            },
        };
        let automation = testutil::automation_with(workspace_id, vec![node.clone()], None);
        let contact = testutil::contact(workspace_id, "a@example.com");
        let cursor = testutil::cursor_on(&automation, "a@example.com", &node.id, now);

        let segments = Arc::new(InMemorySegmentRepository::default());
        let compiled = segment::compile(&predicate).unwrap();
        segments.set_matching(compiled.sql, &[]);

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

        let executor = FilterExecutor::new(segments as Arc<dyn SegmentRepository>);
        let outcome = executor.execute(&ctx).await.unwrap();
        assert_eq!(outcome.status, ContactAutomationStatus::Exited);
        assert_eq!(outcome.exit_reason.as_deref(), Some(FILTER_EXCLUDED));
        assert_eq!(outcome.next, None);
    }
}
