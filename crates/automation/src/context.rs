//! Execution-context reconstruction
//!
//! Instead of persisting a growing context blob on the cursor row, the
//! outputs of prior nodes are rebuilt on demand from the completed
//! NodeExecutions of the cursor.

use flowmail_core::repository::NodeExecutionRepository;
use flowmail_core::types::{ContactAutomationId, NodeId, WorkspaceId};
use std::collections::HashMap;
use tracing::warn;

/// Map prior node ids to their stored outputs. The newest completed attempt
/// of a node wins. A failed read degrades to an empty context with a
/// warning; node execution proceeds regardless.
pub async fn build_execution_context(
    executions: &dyn NodeExecutionRepository,
    workspace_id: &WorkspaceId,
    contact_automation_id: &ContactAutomationId,
) -> HashMap<NodeId, serde_json::Value> {
    match executions
        .list_completed(workspace_id, contact_automation_id)
        .await
    {
        Ok(completed) => {
            let mut context = HashMap::new();
            for execution in completed {
                if let Some(output) = execution.output {
                    context.insert(execution.node_id, output);
                }
            }
            context
        }
        Err(e) => {
            warn!(
                contact_automation_id = %contact_automation_id,
                "failed to rebuild execution context, continuing with empty context: {e}"
            );
            HashMap::new()
        }
    }
}
