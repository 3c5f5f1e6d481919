//! Core domain models for Flowmail
//!
//! These models represent the core business entities and map to database
//! tables. Workspaces partition all of them.

mod automation;
mod contact;
mod integration;
mod message;
mod segment;
mod task;
mod timeline;
mod workspace;

pub use automation::{
    AbVariant, Automation, AutomationStat, AutomationStats, AutomationStatus, ContactAutomation,
    ContactAutomationStatus, Node, NodeConfig, NodeExecution, NodeExecutionAction, node_type,
};
pub use contact::Contact;
pub use integration::{
    EmailIntegration, EmailProviderKind, MailgunSettings, MailjetSettings, PostmarkSettings,
    ProviderSettings, SenderIdentity, SesSettings, SmtpSettings, SparkpostSettings,
};
pub use message::{CompileTemplateRequest, CompileTemplateResult, OutboundMessage};
pub use segment::{
    ContactSegmentMembership, ContactSegmentQueueEntry, DimensionFilter, FieldType, FilterOperator,
    Segment, SegmentStatus, SegmentTree,
};
pub use task::{
    BuildSegmentState, ExecuteAutomationBatchState, Task, TaskFilter, TaskStatus, task_kind,
};
pub use timeline::{TimelineEntry, timeline_op};
pub use workspace::Workspace;
