//! A/B test node: deterministic weighted variant assignment.

use super::{NodeContext, NodeError, NodeExecutor, NodeOutcome};
use anyhow::anyhow;
use async_trait::async_trait;
use flowmail_core::models::{AbVariant, NodeConfig, node_type};
use flowmail_core::types::{ContactAutomationId, NodeId};
use serde_json::json;
use sha2::{Digest, Sha256};

/// Assigns a variant by hashing (contact_automation_id, node_id) modulo the
/// total weight, so retries of the same cursor never reassign.
pub struct AbtestExecutor;

fn assign(cursor_id: &ContactAutomationId, node_id: &NodeId, variants: &[AbVariant]) -> Option<usize> {
    let total: u64 = variants.iter().map(|v| u64::from(v.weight)).sum();
    if total == 0 {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(cursor_id.0.as_bytes());
    hasher.update(node_id.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let roll = u64::from_be_bytes(prefix) % total;

    let mut cumulative = 0u64;
    for (i, variant) in variants.iter().enumerate() {
        cumulative += u64::from(variant.weight);
        if roll < cumulative {
            return Some(i);
        }
    }
    None
}

#[async_trait]
impl NodeExecutor for AbtestExecutor {
    fn node_type(&self) -> &'static str {
        node_type::ABTEST
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let NodeConfig::Abtest { variants } = &ctx.node.config else {
            return Err(NodeError::Fatal(anyhow!(
                "node {} is not an abtest node",
                ctx.node.id
            )));
        };

        let index = assign(&ctx.cursor.id, &ctx.node.id, variants).ok_or_else(|| {
            NodeError::Fatal(anyhow!(
                "abtest node {} has no variant with positive weight",
                ctx.node.id
            ))
        })?;
        let variant = &variants[index];

        Ok(
            NodeOutcome::advance(Some(variant.next.clone())).with_output(json!({
                "variant": variant.next,
                "variant_index": index,
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variants(weights: &[u32]) -> Vec<AbVariant> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| AbVariant {
                next: NodeId::new(format!("variant-{i}")),
                weight: *w,
            })
            .collect()
    }

    #[test]
    fn assignment_is_deterministic_per_cursor_and_node() {
        let cursor_id = ContactAutomationId::new();
        let node_id = NodeId::new("ab1");
        let vs = variants(&[50, 50]);

        let first = assign(&cursor_id, &node_id, &vs).unwrap();
        for _ in 0..10 {
            assert_eq!(assign(&cursor_id, &node_id, &vs).unwrap(), first);
        }
    }

    #[test]
    fn different_cursors_spread_over_variants() {
        let node_id = NodeId::new("ab1");
        let vs = variants(&[1, 1]);
        let mut seen = [0usize; 2];
        for _ in 0..256 {
            let i = assign(&ContactAutomationId::new(), &node_id, &vs).unwrap();
            seen[i] += 1;
        }
        // with 256 hashed cursors both arms must come up
        assert!(seen[0] > 0 && seen[1] > 0, "assignment never spread: {seen:?}");
    }

    #[test]
    fn zero_total_weight_yields_no_assignment() {
        assert_eq!(
            assign(&ContactAutomationId::new(), &NodeId::new("ab"), &variants(&[0, 0])),
            None
        );
    }

    #[test]
    fn all_weight_on_one_arm_always_selects_it() {
        let vs = variants(&[0, 7, 0]);
        for _ in 0..32 {
            assert_eq!(
                assign(&ContactAutomationId::new(), &NodeId::new("ab"), &vs),
                Some(1)
            );
        }
    }
}
