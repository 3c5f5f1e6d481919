//! Flowmail Worker - process entry point
//!
//! Wires the Postgres repositories, node executors, processors, and the
//! task runner together, then runs until interrupted.

use anyhow::Result;
use automation::nodes::NodeExecutorRegistry;
use automation::{AutomationExecutor, db as automation_db};
use flowmail_core::config::CoreConfig;
use flowmail_core::repository::{
    AutomationRepository, AutomationStatsRepository, ContactAutomationRepository,
    ContactListRepository, ContactRepository, ContactSegmentQueueRepository, EmailQueue,
    NodeExecutionRepository, SegmentRepository, TaskRepository, TimelineRepository,
    WorkspaceRepository,
};
use flowmail_core::{Clock, SystemClock};
use segment::db as segment_db;
use std::sync::Arc;
use tracing::info;
use worker::db::{PgTaskRepository, PgWorkspaceRepository};
use worker::processors::{
    BuildSegmentProcessor, CheckSegmentRecomputeProcessor, ExecuteAutomationBatchProcessor,
    ProcessContactSegmentQueueProcessor,
};
use worker::{TaskRunner, WorkerConfig, bootstrap};

#[tokio::main]
async fn main() -> Result<()> {
    flowmail_shared::bootstrap::init_env();
    let _guard = flowmail_shared::bootstrap::init_tracing("worker");

    let core_config = CoreConfig::from_env()?;
    let worker_config = WorkerConfig::from_env()?;
    let pool = flowmail_shared::bootstrap::init_db(&core_config).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let workspaces: Arc<dyn WorkspaceRepository> =
        Arc::new(PgWorkspaceRepository::new(pool.clone()));
    let tasks: Arc<dyn TaskRepository> = Arc::new(PgTaskRepository::new(pool.clone()));
    let segments: Arc<dyn SegmentRepository> =
        Arc::new(segment_db::PgSegmentRepository::new(pool.clone()));
    let contacts: Arc<dyn ContactRepository> =
        Arc::new(segment_db::PgContactRepository::new(pool.clone()));
    let segment_queue: Arc<dyn ContactSegmentQueueRepository> =
        Arc::new(segment_db::PgContactSegmentQueueRepository::new(pool.clone()));
    let automations: Arc<dyn AutomationRepository> =
        Arc::new(automation_db::PgAutomationRepository::new(pool.clone()));
    let cursors: Arc<dyn ContactAutomationRepository> =
        Arc::new(automation_db::PgContactAutomationRepository::new(pool.clone()));
    let executions: Arc<dyn NodeExecutionRepository> =
        Arc::new(automation_db::PgNodeExecutionRepository::new(pool.clone()));
    let timeline: Arc<dyn TimelineRepository> =
        Arc::new(automation_db::PgTimelineRepository::new(pool.clone()));
    let stats: Arc<dyn AutomationStatsRepository> =
        Arc::new(automation_db::PgAutomationStatsRepository::new(pool.clone()));
    let lists: Arc<dyn ContactListRepository> =
        Arc::new(automation_db::PgContactListRepository::new(pool.clone()));
    let email_queue: Arc<dyn EmailQueue> = Arc::new(automation_db::PgEmailQueue::new(pool));

    let registry =
        NodeExecutorRegistry::with_defaults(Arc::clone(&segments), lists, email_queue);
    let executor = Arc::new(AutomationExecutor::new(
        automations,
        Arc::clone(&cursors),
        executions,
        Arc::clone(&contacts),
        timeline,
        stats,
        registry,
        Arc::clone(&clock),
    ));

    let runner = TaskRunner::new(
        Arc::clone(&workspaces),
        Arc::clone(&tasks),
        Arc::clone(&clock),
        worker_config.runner_config(),
    );
    runner.register_processor(Arc::new(BuildSegmentProcessor::new(
        Arc::clone(&segments),
        Arc::clone(&contacts),
        Arc::clone(&tasks),
        Arc::clone(&clock),
    )));
    runner.register_processor(Arc::new(CheckSegmentRecomputeProcessor::new(
        Arc::clone(&segments),
        Arc::clone(&tasks),
        Arc::clone(&clock),
    )));
    runner.register_processor(Arc::new(ProcessContactSegmentQueueProcessor::new(
        segment_queue,
        Arc::clone(&segments),
        Arc::clone(&clock),
    )));
    runner.register_processor(Arc::new(ExecuteAutomationBatchProcessor::new(
        Arc::clone(&cursors),
        executor,
        Arc::clone(&clock),
    )));

    // every workspace gets its permanent maintenance singletons
    for workspace in workspaces.list().await? {
        bootstrap::ensure_recompute_task(tasks.as_ref(), clock.as_ref(), &workspace.id).await?;
        bootstrap::ensure_queue_processor_task(tasks.as_ref(), clock.as_ref(), &workspace.id)
            .await?;
        bootstrap::ensure_automation_batch_task(tasks.as_ref(), clock.as_ref(), &workspace.id)
            .await?;
    }

    runner.start().await;
    info!("worker running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    runner.stop().await;

    Ok(())
}
