//! Singleton-task bootstrap helpers
//!
//! Each workspace carries one permanent recurring task per maintenance
//! concern. These helpers idempotently create the singleton, or resurrect
//! it when a previous incarnation completed, failed, or was paused.

use anyhow::Result;
use flowmail_core::Clock;
use flowmail_core::models::{Task, TaskStatus, task_kind};
use flowmail_core::repository::TaskRepository;
use flowmail_core::types::WorkspaceId;
use serde_json::json;
use tracing::info;

/// Ensure the per-workspace `check_segment_recompute` singleton exists.
pub async fn ensure_recompute_task(
    tasks: &dyn TaskRepository,
    clock: &dyn Clock,
    workspace_id: &WorkspaceId,
) -> Result<()> {
    ensure_singleton(tasks, clock, workspace_id, task_kind::CHECK_SEGMENT_RECOMPUTE).await
}

/// Ensure the per-workspace `process_contact_segment_queue` singleton exists.
pub async fn ensure_queue_processor_task(
    tasks: &dyn TaskRepository,
    clock: &dyn Clock,
    workspace_id: &WorkspaceId,
) -> Result<()> {
    ensure_singleton(
        tasks,
        clock,
        workspace_id,
        task_kind::PROCESS_CONTACT_SEGMENT_QUEUE,
    )
    .await
}

/// Ensure the per-workspace `execute_automation_batch` singleton exists.
pub async fn ensure_automation_batch_task(
    tasks: &dyn TaskRepository,
    clock: &dyn Clock,
    workspace_id: &WorkspaceId,
) -> Result<()> {
    ensure_singleton(tasks, clock, workspace_id, task_kind::EXECUTE_AUTOMATION_BATCH).await
}

async fn ensure_singleton(
    tasks: &dyn TaskRepository,
    clock: &dyn Clock,
    workspace_id: &WorkspaceId,
    kind: &str,
) -> Result<()> {
    let now = clock.now();
    match tasks.find_by_kind(workspace_id, kind).await? {
        Some(mut task) => {
            if matches!(task.status, TaskStatus::Pending | TaskStatus::Running) {
                return Ok(());
            }
            task.status = TaskStatus::Pending;
            task.next_run_after = Some(now);
            task.retry_count = 0;
            task.last_error = None;
            task.updated_at = now;
            tasks.update(&task).await?;
            info!(workspace_id = %workspace_id, kind, "resurrected singleton task");
        }
        None => {
            let mut task = Task::new(*workspace_id, kind, json!({}));
            task.next_run_after = Some(now);
            tasks.create(&task).await?;
            info!(workspace_id = %workspace_id, kind, "created singleton task");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowmail_core::memory::{InMemoryTaskRepository, ManualClock};
    use flowmail_core::models::TaskFilter;

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let tasks = InMemoryTaskRepository::default();
        let clock = ManualClock::new(Utc::now());
        let workspace_id = WorkspaceId::new();

        ensure_recompute_task(&tasks, &clock, &workspace_id).await.unwrap();
        ensure_recompute_task(&tasks, &clock, &workspace_id).await.unwrap();

        let filter = TaskFilter {
            kind: Some(task_kind::CHECK_SEGMENT_RECOMPUTE.to_string()),
            status: None,
        };
        let all = tasks.list(&workspace_id, &filter).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, TaskStatus::Pending);
        assert_eq!(all[0].next_run_after, Some(clock.now()));
    }

    #[tokio::test]
    async fn ensure_resurrects_a_failed_singleton() {
        let tasks = InMemoryTaskRepository::default();
        let clock = ManualClock::new(Utc::now());
        let workspace_id = WorkspaceId::new();

        ensure_queue_processor_task(&tasks, &clock, &workspace_id).await.unwrap();
        let mut task = tasks
            .find_by_kind(&workspace_id, task_kind::PROCESS_CONTACT_SEGMENT_QUEUE)
            .await
            .unwrap()
            .unwrap();
        task.status = TaskStatus::Failed;
        task.last_error = Some("boom".into());
        tasks.update(&task).await.unwrap();

        ensure_queue_processor_task(&tasks, &clock, &workspace_id).await.unwrap();
        let task = tasks
            .find_by_kind(&workspace_id, task_kind::PROCESS_CONTACT_SEGMENT_QUEUE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.last_error.is_none());
        assert_eq!(task.retry_count, 0);
    }
}
