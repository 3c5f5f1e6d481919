//! Type-safe wrappers for domain identifiers
//!
//! These newtypes prevent mixing different ID types at compile time.
//! For example, you cannot pass a `SegmentId` where a `TaskId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
        #[sqlx(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mint a fresh identifier.
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                $name(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Workspace (tenant) identifier
    WorkspaceId
);
uuid_id!(
    /// Task identifier
    TaskId
);
uuid_id!(
    /// Automation identifier
    AutomationId
);
uuid_id!(
    /// Per-contact automation cursor identifier
    ContactAutomationId
);
uuid_id!(
    /// Node execution log entry identifier
    NodeExecutionId
);
uuid_id!(
    /// Segment identifier
    SegmentId
);
uuid_id!(
    /// Email provider integration identifier
    IntegrationId
);
uuid_id!(
    /// Outbound message identifier
    MessageId
);
uuid_id!(
    /// Contact list identifier
    ListId
);

/// Automation graph node identifier.
///
/// Node ids are authored inside the automation definition JSON, so unlike the
/// other identifiers they are free-form strings rather than uuids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_creation_is_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
        assert_ne!(SegmentId::new(), SegmentId::new());
        assert_ne!(WorkspaceId::new(), WorkspaceId::new());
    }

    #[test]
    fn test_id_roundtrips_through_uuid() {
        let uuid = Uuid::new_v4();
        let id = AutomationId::from(uuid);
        assert_eq!(Uuid::from(id), uuid);
    }

    #[test]
    fn test_id_serialization_is_transparent() {
        let id = SegmentId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: SegmentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_node_id_is_a_plain_string() {
        let id = NodeId::new("delay-1");
        assert_eq!(id.as_str(), "delay-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"delay-1\"");
    }
}
