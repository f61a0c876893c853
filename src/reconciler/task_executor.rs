//! The task executor seam.
//!
//! The production task reconciler (container scheduling, per-task retry
//! and timeout policy) is an external collaborator. The engine only needs
//! the contract: run the task to a terminal status, observing the cancel
//! flag. `ImmediateTaskExecutor` is the reference implementation used by
//! examples and benchmarks; scripted executors for tests live in
//! `crate::testing`.

use super::CancelFlag;
use crate::core::{Pipeline, PipelineStatus, Task};
use crate::store::Store;
use crate::utils::now_utc;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

/// Runs a single task until it reaches a terminal status.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Blocks until the task's row holds a terminal status.
    ///
    /// Implementations own the task row exclusively, are responsible for
    /// their own retry/timeout behavior, and must observe `canceling` by
    /// finishing the task as `StopByUser`.
    async fn run_until_done(&self, pipeline: &Pipeline, task: &Task, canceling: &CancelFlag);
}

/// An executor that completes every task in one step.
///
/// Marks the task `Running`, then terminal: `StopByUser` when canceling,
/// `NoNeedBySystem` when a dependency did not finish success-like,
/// `Success` otherwise.
pub struct ImmediateTaskExecutor {
    store: Arc<dyn Store>,
}

impl ImmediateTaskExecutor {
    /// Creates an executor writing through the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn terminal_status_for(&self, task: &Task, canceling: &CancelFlag) -> PipelineStatus {
        if canceling.is_canceled() {
            return PipelineStatus::StopByUser;
        }
        if task.deps.is_empty() {
            return PipelineStatus::Success;
        }
        match self.store.list_tasks(task.pipeline_id).await {
            Ok(rows) => {
                let dep_broke = task.deps.iter().any(|dep| {
                    rows.iter()
                        .find(|r| &r.name == dep)
                        .is_none_or(|r| !r.status.is_success_like())
                });
                if dep_broke {
                    PipelineStatus::NoNeedBySystem
                } else {
                    PipelineStatus::Success
                }
            }
            Err(err) => {
                error!(
                    pipeline_id = task.pipeline_id,
                    task = %task.name,
                    %err,
                    "failed to inspect dependencies, skipping task"
                );
                PipelineStatus::NoNeedBySystem
            }
        }
    }

    async fn write_row(&self, row: &Task) {
        if let Err(err) = self.store.upsert_task(row).await {
            error!(
                pipeline_id = row.pipeline_id,
                task = %row.name,
                %err,
                "failed to persist task row"
            );
        }
    }
}

#[async_trait]
impl TaskExecutor for ImmediateTaskExecutor {
    async fn run_until_done(&self, _pipeline: &Pipeline, task: &Task, canceling: &CancelFlag) {
        let mut row = task.clone();
        row.status = PipelineStatus::Running;
        row.time_begin = Some(now_utc());
        self.write_row(&row).await;

        row.status = self.terminal_status_for(task, canceling).await;
        row.time_end = Some(now_utc());
        self.write_row(&row).await;

        info!(
            pipeline_id = row.pipeline_id,
            task = %row.name,
            status = %row.status,
            "task finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskSpec;
    use crate::store::InMemoryStore;

    fn setup() -> (Arc<InMemoryStore>, Pipeline) {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = Pipeline::new(
            1,
            "ns-1",
            vec![TaskSpec::new("a"), TaskSpec::new("b").with_dep("a")],
        );
        store.insert_pipeline(pipeline.clone());
        (store, pipeline)
    }

    #[tokio::test]
    async fn test_task_without_deps_succeeds() {
        let (store, pipeline) = setup();
        let executor = ImmediateTaskExecutor::new(store.clone());
        let task = Task::from_spec(1, &pipeline.specs[0]);

        executor
            .run_until_done(&pipeline, &task, &CancelFlag::new())
            .await;

        let row = store.task(1, "a").unwrap();
        assert_eq!(row.status, PipelineStatus::Success);
        assert!(row.time_begin.is_some());
        assert!(row.time_end.is_some());
    }

    #[tokio::test]
    async fn test_canceling_finishes_stop_by_user() {
        let (store, pipeline) = setup();
        let executor = ImmediateTaskExecutor::new(store.clone());
        let task = Task::from_spec(1, &pipeline.specs[0]);
        let flag = CancelFlag::new();
        flag.cancel("stop requested");

        executor.run_until_done(&pipeline, &task, &flag).await;

        assert_eq!(store.task(1, "a").unwrap().status, PipelineStatus::StopByUser);
    }

    #[tokio::test]
    async fn test_failed_dep_skips_task() {
        let (store, pipeline) = setup();
        let executor = ImmediateTaskExecutor::new(store.clone());

        let mut dep_row = Task::from_spec(1, &pipeline.specs[0]);
        dep_row.status = PipelineStatus::Failed;
        store.upsert_task(&dep_row).await.unwrap();

        let task = Task::from_spec(1, &pipeline.specs[1]);
        executor
            .run_until_done(&pipeline, &task, &CancelFlag::new())
            .await;

        assert_eq!(
            store.task(1, "b").unwrap().status,
            PipelineStatus::NoNeedBySystem
        );
    }

    #[tokio::test]
    async fn test_skipped_dep_counts_as_success() {
        let (store, pipeline) = setup();
        let executor = ImmediateTaskExecutor::new(store.clone());

        let mut dep_row = Task::from_spec(1, &pipeline.specs[0]);
        dep_row.status = PipelineStatus::NoNeedBySystem;
        store.upsert_task(&dep_row).await.unwrap();

        let task = Task::from_spec(1, &pipeline.specs[1]);
        executor
            .run_until_done(&pipeline, &task, &CancelFlag::new())
            .await;

        assert_eq!(store.task(1, "b").unwrap().status, PipelineStatus::Success);
    }
}
