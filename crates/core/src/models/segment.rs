//! Dynamic audience segments
//!
//! A segment is defined by a predicate tree over contact fields. The segment
//! engine compiles the tree to parameterized SQL and maintains membership
//! rows versioned by the segment's rebuild generation.

use crate::types::{SegmentId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Segment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "segment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Draft,
    Building,
    Active,
    Deleted,
}

/// Field type of a dimension filter leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Numeric,
    Date,
    Bool,
}

/// Comparison operator of a dimension filter leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    In,
    Between,
    IsNull,
    IsNotNull,
}

/// A single comparison against one contact field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionFilter {
    pub field: String,
    pub field_type: FieldType,
    pub operator: FilterOperator,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
    /// String comparisons are case-insensitive unless set
    #[serde(default)]
    pub case_sensitive: bool,
}

/// Boolean composition tree of dimension filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentTree {
    And { children: Vec<SegmentTree> },
    Or { children: Vec<SegmentTree> },
    Not { child: Box<SegmentTree> },
    Leaf { filter: DimensionFilter },
}

impl SegmentTree {
    pub fn leaf(filter: DimensionFilter) -> Self {
        SegmentTree::Leaf { filter }
    }
}

/// Dynamic audience definition
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Segment {
    pub id: SegmentId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub status: SegmentStatus,
    /// Monotone rebuild generation; membership rows carry the version they
    /// were written under
    pub version: i64,
    #[sqlx(json)]
    pub tree: SegmentTree,
    /// WHERE fragment compiled from `tree`, placeholders starting at `$1`
    pub generated_sql: Option<String>,
    /// JSON array of positional arguments matching `generated_sql`
    pub generated_args: Option<serde_json::Value>,
    /// Next scheduled full recompute; null disables the schedule
    pub recompute_after: Option<DateTime<Utc>>,
    pub recompute_interval_hours: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    /// The compiled predicate, when one has been stored.
    pub fn compiled(&self) -> Option<(&str, &[serde_json::Value])> {
        let sql = self.generated_sql.as_deref()?;
        let args = self
            .generated_args
            .as_ref()
            .and_then(|v| v.as_array())
            .map_or(&[][..], Vec::as_slice);
        Some((sql, args))
    }
}

/// A (contact, segment, version) inclusion fact
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContactSegmentMembership {
    pub workspace_id: WorkspaceId,
    pub segment_id: SegmentId,
    pub email: String,
    pub version: i64,
    pub added_at: DateTime<Utc>,
}

/// Incremental membership recheck request
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContactSegmentQueueEntry {
    pub workspace_id: WorkspaceId,
    pub email: String,
    pub queued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tree_round_trips_through_json() {
        let tree = SegmentTree::And {
            children: vec![
                SegmentTree::leaf(DimensionFilter {
                    field: "country".into(),
                    field_type: FieldType::String,
                    operator: FilterOperator::Eq,
                    values: vec![json!("NL")],
                    case_sensitive: false,
                }),
                SegmentTree::Not {
                    child: Box::new(SegmentTree::leaf(DimensionFilter {
                        field: "orders".into(),
                        field_type: FieldType::Numeric,
                        operator: FilterOperator::Lt,
                        values: vec![json!(3)],
                        case_sensitive: false,
                    })),
                },
            ],
        };

        let value = serde_json::to_value(&tree).unwrap();
        assert_eq!(value["kind"], "and");
        let back: SegmentTree = serde_json::from_value(value).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn compiled_returns_sql_and_args() {
        let mut segment = Segment {
            id: SegmentId::new(),
            workspace_id: WorkspaceId::new(),
            name: "vip".into(),
            status: SegmentStatus::Active,
            version: 3,
            tree: SegmentTree::leaf(DimensionFilter {
                field: "email".into(),
                field_type: FieldType::String,
                operator: FilterOperator::IsNotNull,
                values: vec![],
                case_sensitive: false,
            }),
            generated_sql: Some("lower(country) = lower($1)".into()),
            generated_args: Some(json!(["NL"])),
            recompute_after: None,
            recompute_interval_hours: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let (sql, args) = segment.compiled().unwrap();
        assert!(sql.contains("$1"));
        assert_eq!(args.len(), 1);

        segment.generated_sql = None;
        assert!(segment.compiled().is_none());
    }
}
