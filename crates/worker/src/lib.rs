//! Flowmail Worker - recurring task runner
//!
//! Claims due tasks from the workspace-partitioned store on a fixed tick,
//! dispatches them to registered processors under a wall-clock budget, and
//! persists the resulting status transitions. Permanent recurring tasks
//! re-queue themselves immediately; everything else follows the
//! completion / pause / retry rules.

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod processors;

pub use config::WorkerConfig;
pub use processors::{Processor, ProcessorContext};

use chrono::Duration as ChronoDuration;
use flowmail_core::Clock;
use flowmail_core::models::{Task, TaskFilter, TaskStatus};
use flowmail_core::repository::{TaskRepository, WorkspaceRepository};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Budget applied when a task does not set `max_runtime_seconds`.
const DEFAULT_MAX_RUNTIME: Duration = Duration::from_secs(50);

/// How long `stop()` waits for in-flight processors before abandoning them.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Error message recorded when a processor outlives its budget.
const BUDGET_EXCEEDED: &str = "runtime budget exceeded";

/// Runner tuning knobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Tick period of the claim loop
    pub interval: Duration,
    /// Maximum tasks claimed per workspace per tick
    pub batch_size: i64,
    /// How often to log outstanding queue depth
    pub status_log_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            batch_size: 10,
            status_log_interval: Duration::from_secs(60),
        }
    }
}

struct RunnerInner {
    workspaces: Arc<dyn WorkspaceRepository>,
    tasks: Arc<dyn TaskRepository>,
    processors: RwLock<Vec<Arc<dyn Processor>>>,
    clock: Arc<dyn Clock>,
    config: RunnerConfig,
    cancel: CancellationToken,
}

/// The per-process task scheduler.
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
    started: AtomicBool,
    handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TaskRunner {
    pub fn new(
        workspaces: Arc<dyn WorkspaceRepository>,
        tasks: Arc<dyn TaskRepository>,
        clock: Arc<dyn Clock>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                workspaces,
                tasks,
                processors: RwLock::new(Vec::new()),
                clock,
                config,
                cancel: CancellationToken::new(),
            }),
            started: AtomicBool::new(false),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Register a processor capability. Dispatch asks each registered
    /// processor whether it handles the task's kind, in registration order.
    pub fn register_processor(&self, processor: Arc<dyn Processor>) {
        self.inner
            .processors
            .write()
            .expect("processor registry poisoned")
            .push(processor);
    }

    /// Start the tick loop. Idempotent; the first pass runs immediately.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("task runner already started");
            return;
        }
        info!(
            interval_secs = self.inner.config.interval.as_secs(),
            batch_size = self.inner.config.batch_size,
            "starting task runner"
        );

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut last_status_log = Instant::now();

            // one iteration immediately, before the first tick
            inner.run_once().await;

            loop {
                tokio::select! {
                    () = inner.cancel.cancelled() => {
                        info!("task runner loop stopping");
                        break;
                    }
                    () = tokio::time::sleep(inner.config.interval) => {
                        inner.run_once().await;
                        if last_status_log.elapsed() >= inner.config.status_log_interval {
                            inner.log_queue_depth().await;
                            last_status_log = Instant::now();
                        }
                    }
                }
            }
        });
        *self.handle.lock().await = Some(handle);
    }

    /// Stop the loop and wait up to the grace period for in-flight
    /// processors. Idempotent.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();

        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(STOP_GRACE, handle).await {
            Ok(Ok(())) => info!("task runner stopped"),
            Ok(Err(e)) => error!("task runner loop panicked: {e}"),
            Err(_) => {
                // abandoned processors lose their claim; it reverts to
                // pending once the lease expires
                warn!(
                    grace_secs = STOP_GRACE.as_secs(),
                    "task runner did not drain within the grace period, abandoning in-flight work"
                );
            }
        }
    }

    /// Run a single claim-and-dispatch pass across every workspace.
    /// Exposed for the immediate first pass and for tests.
    pub async fn run_once(&self) {
        self.inner.run_once().await;
    }
}

impl RunnerInner {
    async fn run_once(self: &Arc<Self>) {
        let workspaces = match self.workspaces.list().await {
            Ok(workspaces) => workspaces,
            Err(e) => {
                error!("failed to list workspaces: {e}");
                return;
            }
        };

        let mut join_set = JoinSet::new();
        let now = self.clock.now();
        for workspace in workspaces {
            let claimed = match self
                .tasks
                .claim_due(&workspace.id, self.config.batch_size, now)
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(workspace_id = %workspace.id, "failed to claim tasks: {e}");
                    continue;
                }
            };
            if !claimed.is_empty() {
                debug!(workspace_id = %workspace.id, count = claimed.len(), "claimed tasks");
            }
            for task in claimed {
                let inner = Arc::clone(self);
                join_set.spawn(async move { inner.run_task(task).await });
            }
        }

        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                error!("task join error: {e}");
            }
        }
    }

    async fn run_task(&self, mut task: Task) {
        let now = self.clock.now();
        let budget = task
            .max_runtime_seconds
            .map_or(DEFAULT_MAX_RUNTIME, |s| Duration::from_secs(s.unsigned_abs()));
        let deadline = now + ChronoDuration::from_std(budget).unwrap_or(ChronoDuration::seconds(50));

        let processor = {
            let registry = self.processors.read().expect("processor registry poisoned");
            registry.iter().find(|p| p.handles(&task.kind)).cloned()
        };

        let Some(processor) = processor else {
            error!(task_id = %task.id, kind = %task.kind, "no processor registered for task kind");
            task.status = TaskStatus::Failed;
            task.last_error = Some(format!("no processor registered for kind {:?}", task.kind));
            task.updated_at = now;
            self.persist(&task).await;
            return;
        };

        let ctx = ProcessorContext {
            workspace_id: task.workspace_id,
            cancel: self.cancel.child_token(),
        };

        debug!(task_id = %task.id, kind = %task.kind, "processing task");
        let outcome = tokio::time::timeout(budget, processor.process(&ctx, &mut task, deadline)).await;

        let now = self.clock.now();
        match outcome {
            Ok(Ok(true)) => {
                task.status = TaskStatus::Completed;
                task.progress = 1.0;
                task.next_run_after = None;
                info!(task_id = %task.id, kind = %task.kind, "task completed");
            }
            Ok(Ok(false)) => {
                task.status = TaskStatus::Pending;
                if task.is_permanent() {
                    task.next_run_after = Some(now);
                    task.progress = 0.0;
                } else {
                    // paused mid-work; pick it back up almost immediately
                    task.next_run_after = Some(now + ChronoDuration::seconds(1));
                }
            }
            Ok(Err(e)) => {
                if e.downcast_ref::<processors::FatalTaskError>().is_some() {
                    task.status = TaskStatus::Failed;
                    task.last_error = Some(format!("{e:#}"));
                    task.next_run_after = None;
                    error!(task_id = %task.id, kind = %task.kind, "task failed: {e:#}");
                } else {
                    self.apply_retry(&mut task, now, &format!("{e:#}"));
                }
            }
            Err(_elapsed) => self.apply_retry(&mut task, now, BUDGET_EXCEEDED),
        }
        task.updated_at = now;
        self.persist(&task).await;
    }

    fn apply_retry(&self, task: &mut Task, now: chrono::DateTime<chrono::Utc>, error: &str) {
        task.retry_count += 1;
        if task.retry_count >= task.max_retries {
            task.status = TaskStatus::Failed;
            task.last_error = Some(error.to_string());
            task.next_run_after = None;
            error!(task_id = %task.id, kind = %task.kind, retries = task.retry_count,
                "task failed permanently: {error}");
        } else {
            task.status = TaskStatus::Pending;
            task.last_error = Some(error.to_string());
            task.next_run_after = Some(now + ChronoDuration::seconds(task.retry_interval_seconds.max(1)));
            warn!(task_id = %task.id, kind = %task.kind, retry = task.retry_count,
                "task errored, retrying: {error}");
        }
    }

    async fn persist(&self, task: &Task) {
        if let Err(e) = self.tasks.update(task).await {
            error!(task_id = %task.id, "failed to persist task transition: {e}");
        }
    }

    async fn log_queue_depth(&self) {
        let Ok(workspaces) = self.workspaces.list().await else {
            return;
        };
        let filter = TaskFilter {
            status: Some(TaskStatus::Pending),
            kind: None,
        };
        let mut pending = 0usize;
        for workspace in workspaces {
            if let Ok(tasks) = self.tasks.list(&workspace.id, &filter).await {
                pending += tasks.len();
            }
        }
        if pending > 0 {
            info!(pending, "queue status: pending tasks remaining");
        }
    }
}
