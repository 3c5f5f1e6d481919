//! Task runner behavior on in-memory stores with a manual clock.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use flowmail_core::Clock;
use flowmail_core::memory::{InMemoryTaskRepository, InMemoryWorkspaceRepository, ManualClock};
use flowmail_core::models::{Task, TaskStatus, Workspace, task_kind};
use flowmail_core::repository::{TaskRepository, WorkspaceRepository};
use flowmail_core::types::WorkspaceId;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use worker::processors::FatalTaskError;
use worker::{Processor, ProcessorContext, RunnerConfig, TaskRunner};

enum Behavior {
    Complete,
    Partial,
    Fail,
    FailFatal,
    Hang,
}

struct StaticProcessor {
    kind: &'static str,
    behavior: Behavior,
}

#[async_trait]
impl Processor for StaticProcessor {
    fn handles(&self, kind: &str) -> bool {
        kind == self.kind
    }

    async fn process(
        &self,
        _ctx: &ProcessorContext,
        task: &mut Task,
        _deadline: DateTime<Utc>,
    ) -> Result<bool> {
        match self.behavior {
            Behavior::Complete => {
                task.progress = 1.0;
                Ok(true)
            }
            Behavior::Partial => Ok(false),
            Behavior::Fail => Err(anyhow!("downstream unavailable")),
            Behavior::FailFatal => Err(anyhow!(FatalTaskError("bad definition".into()))),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(true)
            }
        }
    }
}

struct Fixture {
    workspace_id: WorkspaceId,
    tasks: Arc<InMemoryTaskRepository>,
    clock: Arc<ManualClock>,
    runner: TaskRunner,
}

fn fixture(processors: Vec<Arc<dyn Processor>>) -> Fixture {
    let workspace = Workspace::new("acme");
    let workspace_id = workspace.id;
    let workspaces = Arc::new(InMemoryWorkspaceRepository::with(vec![workspace]));
    let tasks = Arc::new(InMemoryTaskRepository::default());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let runner = TaskRunner::new(
        workspaces as Arc<dyn WorkspaceRepository>,
        Arc::clone(&tasks) as Arc<dyn TaskRepository>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        RunnerConfig {
            interval: Duration::from_secs(3600),
            batch_size: 10,
            status_log_interval: Duration::from_secs(3600),
        },
    );
    for processor in processors {
        runner.register_processor(processor);
    }
    Fixture {
        workspace_id,
        tasks,
        clock,
        runner,
    }
}

async fn only_task(fixture: &Fixture) -> Task {
    let all = fixture.tasks.all();
    assert_eq!(all.len(), 1);
    all.into_iter().next().unwrap()
}

#[tokio::test]
async fn completed_processor_completes_the_task() {
    let f = fixture(vec![Arc::new(StaticProcessor {
        kind: "one_shot_export",
        behavior: Behavior::Complete,
    })]);
    let task = Task::new(f.workspace_id, "one_shot_export", json!({}));
    f.tasks.create(&task).await.unwrap();

    f.runner.run_once().await;

    let task = only_task(&f).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 1.0);
    assert!(task.next_run_after.is_none());
}

#[tokio::test]
async fn permanent_task_requeues_immediately_with_progress_reset() {
    let f = fixture(vec![Arc::new(StaticProcessor {
        kind: task_kind::CHECK_SEGMENT_RECOMPUTE,
        behavior: Behavior::Partial,
    })]);
    let mut task = Task::new(f.workspace_id, task_kind::CHECK_SEGMENT_RECOMPUTE, json!({}));
    task.progress = 0.7;
    f.tasks.create(&task).await.unwrap();

    f.runner.run_once().await;

    let task = only_task(&f).await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.next_run_after, Some(f.clock.now()));
    assert_eq!(task.progress, 0.0);
}

#[tokio::test]
async fn paused_mid_work_task_requeues_after_a_second() {
    let f = fixture(vec![Arc::new(StaticProcessor {
        kind: task_kind::BUILD_SEGMENT,
        behavior: Behavior::Partial,
    })]);
    let task = Task::new(f.workspace_id, task_kind::BUILD_SEGMENT, json!({}));
    f.tasks.create(&task).await.unwrap();

    f.runner.run_once().await;

    let task = only_task(&f).await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(
        task.next_run_after,
        Some(f.clock.now() + ChronoDuration::seconds(1))
    );
}

#[tokio::test]
async fn errors_retry_on_the_interval_then_fail_permanently() {
    let f = fixture(vec![Arc::new(StaticProcessor {
        kind: "flaky_export",
        behavior: Behavior::Fail,
    })]);
    let mut task = Task::new(f.workspace_id, "flaky_export", json!({}));
    task.max_retries = 2;
    task.retry_interval_seconds = 30;
    f.tasks.create(&task).await.unwrap();

    f.runner.run_once().await;
    let task = only_task(&f).await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 1);
    assert_eq!(
        task.next_run_after,
        Some(f.clock.now() + ChronoDuration::seconds(30))
    );
    assert!(task.last_error.as_deref().unwrap_or_default().contains("downstream"));

    // second attempt exhausts the budget
    f.clock.advance(ChronoDuration::seconds(30));
    f.runner.run_once().await;
    let task = only_task(&f).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert!(task.last_error.is_some());
}

#[tokio::test]
async fn fatal_errors_skip_the_retry_budget() {
    let f = fixture(vec![Arc::new(StaticProcessor {
        kind: task_kind::BUILD_SEGMENT,
        behavior: Behavior::FailFatal,
    })]);
    let task = Task::new(f.workspace_id, task_kind::BUILD_SEGMENT, json!({}));
    f.tasks.create(&task).await.unwrap();

    f.runner.run_once().await;

    let task = only_task(&f).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 0);
    assert!(task.last_error.as_deref().unwrap_or_default().contains("bad definition"));
}

#[tokio::test]
async fn budget_overrun_is_a_retryable_error() {
    let f = fixture(vec![Arc::new(StaticProcessor {
        kind: "slow_export",
        behavior: Behavior::Hang,
    })]);
    let mut task = Task::new(f.workspace_id, "slow_export", json!({}));
    task.max_runtime_seconds = Some(1);
    f.tasks.create(&task).await.unwrap();

    f.runner.run_once().await;

    let task = only_task(&f).await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.last_error.as_deref(), Some("runtime budget exceeded"));
}

#[tokio::test]
async fn unknown_kind_fails_without_a_processor() {
    let f = fixture(vec![]);
    let task = Task::new(f.workspace_id, "mystery", json!({}));
    f.tasks.create(&task).await.unwrap();

    f.runner.run_once().await;

    let task = only_task(&f).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(
        task.last_error
            .as_deref()
            .unwrap_or_default()
            .contains("no processor registered")
    );
}

#[tokio::test]
async fn start_runs_one_pass_immediately_and_stop_is_idempotent() {
    let f = fixture(vec![Arc::new(StaticProcessor {
        kind: "one_shot_export",
        behavior: Behavior::Complete,
    })]);
    let task = Task::new(f.workspace_id, "one_shot_export", json!({}));
    f.tasks.create(&task).await.unwrap();

    // interval is an hour; only the immediate pass can complete the task
    f.runner.start().await;
    f.runner.start().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let task = only_task(&f).await;
    assert_eq!(task.status, TaskStatus::Completed);

    f.runner.stop().await;
    f.runner.stop().await;
}
