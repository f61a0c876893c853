//! End-to-end reconciler scenarios over the in-memory store.

use crate::config::ReconcilerConfig;
use crate::core::{Pipeline, PipelineStatus, Task};
use crate::errors::ReconcileError;
use crate::events::CollectingEventSink;
use crate::metrics::CollectingMetricsSink;
use crate::planner::TaskPlanner;
use crate::reconciler::{DefaultPipelineReconciler, PipelineReconciler};
use crate::store::{InMemoryStore, StoreOp};
use crate::testing::{queued_pipeline, seeded_store, ScriptedTaskExecutor};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: Arc<InMemoryStore>,
    executor: Arc<ScriptedTaskExecutor>,
    events: Arc<CollectingEventSink>,
    metrics: Arc<CollectingMetricsSink>,
    reconciler: Arc<DefaultPipelineReconciler>,
}

impl Harness {
    fn new(pipeline: &Pipeline) -> Self {
        let store = seeded_store(pipeline);
        let executor = Arc::new(ScriptedTaskExecutor::new(store.clone()));
        let events = Arc::new(CollectingEventSink::new());
        let metrics = Arc::new(CollectingMetricsSink::new());
        let config = ReconcilerConfig::new().with_retry_interval(Duration::from_millis(5));
        let reconciler = Arc::new(
            DefaultPipelineReconciler::new(config, store.clone(), executor.clone())
                .with_event_sink(events.clone())
                .with_metrics_sink(metrics.clone()),
        );
        Self {
            store,
            executor,
            events,
            metrics,
            reconciler,
        }
    }

    async fn run(&self, mut pipeline: Pipeline) -> Pipeline {
        tokio::time::timeout(Duration::from_secs(10), async {
            self.reconciler.clone().reconcile(&mut pipeline).await.unwrap();
        })
        .await
        .expect("reconcile did not finish in time");
        pipeline
    }
}

fn assert_monotone_terminal(history: &[PipelineStatus]) {
    let terminal_count = history.iter().filter(|s| s.is_terminal()).count();
    assert!(terminal_count <= 1, "more than one terminal write: {history:?}");
    if let Some(last) = history.last() {
        if terminal_count == 1 {
            assert!(last.is_terminal(), "terminal write not last: {history:?}");
        }
    }
}

#[tokio::test]
async fn test_single_task_success() {
    let pipeline = queued_pipeline(1, &[("a", &[])]);
    let harness = Harness::new(&pipeline);

    let finished = harness.run(pipeline).await;

    assert_eq!(finished.status(), PipelineStatus::Success);
    assert!(finished.base.time_end.is_some());
    assert!(finished.extra.complete_reconciler_teardown);

    let row = harness.store.pipeline(1).unwrap();
    assert_eq!(row.status(), PipelineStatus::Success);
    assert!(row.base.time_end.is_some());
    assert!(row.extra.complete_reconciler_teardown);

    assert_eq!(harness.executor.call_count("a"), 1);
    assert_eq!(harness.events.statuses(), vec!["Running", "Success"]);
    assert_monotone_terminal(&harness.store.pipeline_status_history(1));
}

#[tokio::test]
async fn test_parallel_tasks_with_one_failure() {
    let pipeline = queued_pipeline(2, &[("a", &[]), ("b", &[]), ("c", &[])]);
    let harness = Harness::new(&pipeline);
    harness.executor.script("b", PipelineStatus::Failed);

    let finished = harness.run(pipeline).await;

    assert_eq!(finished.status(), PipelineStatus::Failed);
    for name in ["a", "b", "c"] {
        assert_eq!(harness.executor.call_count(name), 1, "task {name}");
    }
    let row = harness.store.pipeline(2).unwrap();
    assert_eq!(row.status(), PipelineStatus::Failed);
    assert!(row.base.time_end.is_some());
    assert_monotone_terminal(&harness.store.pipeline_status_history(2));
}

#[tokio::test]
async fn test_cancel_mid_flight_converges_to_stop_by_user() {
    let pipeline = queued_pipeline(3, &[("a", &[]), ("b", &[])]);
    let harness = Harness::new(&pipeline);
    harness.executor.script_delay("a", Duration::from_secs(30));
    harness.executor.script_delay("b", Duration::from_secs(30));

    let reconciler = harness.reconciler.clone();
    let mut running = pipeline.clone();
    let driver = tokio::spawn(async move { reconciler.reconcile(&mut running).await });

    // Cancel only once both workers have written their Running rows.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if harness.store.task(3, "a").is_some() && harness.store.task(3, "b").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("workers did not start");
    harness.reconciler.cancel_reconcile();

    tokio::time::timeout(Duration::from_secs(10), driver)
        .await
        .expect("cancel did not converge")
        .unwrap()
        .unwrap();

    let row = harness.store.pipeline(3).unwrap();
    assert_eq!(row.status(), PipelineStatus::StopByUser);
    assert!(row.extra.complete_reconciler_teardown);
    for name in ["a", "b"] {
        assert_eq!(
            harness.store.task(3, name).unwrap().status,
            PipelineStatus::StopByUser,
            "task {name}"
        );
    }
    assert_monotone_terminal(&harness.store.pipeline_status_history(3));
}

#[tokio::test]
async fn test_store_flake_on_prepare_emits_single_running_event() {
    let pipeline = queued_pipeline(4, &[("a", &[])]);
    let harness = Harness::new(&pipeline);
    harness.store.fail_next(StoreOp::UpdatePipelineStatus, 3);

    let finished = harness.run(pipeline).await;

    assert_eq!(finished.status(), PipelineStatus::Success);
    let running_events = harness
        .events
        .statuses()
        .iter()
        .filter(|s| s.as_str() == "Running")
        .count();
    assert_eq!(running_events, 1);
    assert_eq!(
        harness.store.pipeline_status_history(4),
        vec![
            PipelineStatus::Queue,
            PipelineStatus::Running,
            PipelineStatus::Success
        ]
    );
}

#[tokio::test]
async fn test_empty_pipeline_succeeds_without_dispatch() {
    let pipeline = queued_pipeline(5, &[]);
    let harness = Harness::new(&pipeline);

    let finished = harness.run(pipeline).await;

    assert_eq!(finished.status(), PipelineStatus::Success);
    assert!(finished.extra.complete_reconciler_teardown);
    assert_eq!(harness.executor.total_calls(), 0);
    assert_eq!(harness.events.statuses(), vec!["Running", "Success"]);
    assert_eq!(harness.metrics.total(), 1);
    assert_eq!(harness.metrics.processing(), -1);
    assert_eq!(harness.metrics.end_events(), vec![(5, "Success".to_string())]);
}

#[tokio::test]
async fn test_replanning_schedules_dependent_after_dependency() {
    let pipeline = queued_pipeline(6, &[("a", &[]), ("b", &["a"])]);
    let harness = Harness::new(&pipeline);
    harness.executor.script_delay("a", Duration::from_millis(30));

    let finished = harness.run(pipeline).await;

    assert_eq!(finished.status(), PipelineStatus::Success);
    assert_eq!(harness.executor.started_order(), vec!["a", "b"]);
    assert_eq!(harness.executor.call_count("a"), 1);
    assert_eq!(harness.executor.call_count("b"), 1);
    // "b" is only planned once "a" is terminal.
    let a_ended = harness.executor.ended_at("a").unwrap();
    let b_started = harness.executor.started_at("b").unwrap();
    assert!(b_started >= a_ended);
}

/// A planner that re-emits every task on every pass; the reconciler's
/// leased set must still guarantee at-most-once dispatch per name.
struct EagerPlanner;

#[async_trait]
impl TaskPlanner for EagerPlanner {
    async fn schedulable_tasks(
        &self,
        _pipeline: &Pipeline,
        all_tasks: &[Task],
    ) -> Result<Vec<Task>, ReconcileError> {
        Ok(all_tasks.to_vec())
    }
}

#[tokio::test]
async fn test_at_most_once_dispatch_with_reemitting_planner() {
    let pipeline = queued_pipeline(7, &[("a", &[]), ("b", &[]), ("c", &[])]);
    let store = seeded_store(&pipeline);
    let executor = Arc::new(ScriptedTaskExecutor::new(store.clone()));
    let config = ReconcilerConfig::new().with_retry_interval(Duration::from_millis(5));
    let reconciler = Arc::new(
        DefaultPipelineReconciler::new(config, store.clone(), executor.clone())
            .with_planner(Arc::new(EagerPlanner)),
    );

    let mut pipeline = pipeline;
    tokio::time::timeout(Duration::from_secs(10), async {
        reconciler.clone().reconcile(&mut pipeline).await.unwrap();
    })
    .await
    .expect("reconcile did not finish in time");

    assert_eq!(pipeline.status(), PipelineStatus::Success);
    for name in ["a", "b", "c"] {
        assert_eq!(executor.call_count(name), 1, "task {name}");
    }
}

#[tokio::test]
async fn test_terminal_pipeline_returns_immediately() {
    let mut pipeline = queued_pipeline(8, &[("a", &[])]);
    pipeline.base.status = PipelineStatus::Success;
    let harness = Harness::new(&pipeline);

    let finished = harness.run(pipeline).await;

    assert_eq!(finished.status(), PipelineStatus::Success);
    assert_eq!(harness.executor.total_calls(), 0);
    assert!(harness.events.is_empty());
    // Idempotent with respect to already-terminal pipelines: no teardown.
    assert!(!finished.extra.complete_reconciler_teardown);
}

#[tokio::test]
async fn test_shutdown_abandons_reconcile_without_teardown() {
    let pipeline = queued_pipeline(9, &[("slow", &[])]);
    let harness = Harness::new(&pipeline);
    harness
        .executor
        .script_delay("slow", Duration::from_secs(60));

    let reconciler = harness.reconciler.clone();
    let mut running = pipeline.clone();
    let driver = tokio::spawn(async move { reconciler.reconcile(&mut running).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.reconciler.shutdown_token().shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .expect("shutdown did not interrupt reconcile")
        .unwrap();
    assert!(matches!(result, Err(ReconcileError::Shutdown(_))));
    assert!(
        !harness
            .store
            .pipeline(9)
            .unwrap()
            .extra
            .complete_reconciler_teardown
    );
}

#[tokio::test]
async fn test_dep_failure_marks_dependent_skipped_and_pipeline_failed() {
    let pipeline = queued_pipeline(10, &[("a", &[]), ("b", &["a"])]);
    let harness = Harness::new(&pipeline);
    harness.executor.script("a", PipelineStatus::Failed);
    harness.executor.script("b", PipelineStatus::NoNeedBySystem);

    let finished = harness.run(pipeline).await;

    assert_eq!(finished.status(), PipelineStatus::Failed);
    assert_eq!(
        harness.store.task(10, "b").unwrap().status,
        PipelineStatus::NoNeedBySystem
    );
    assert_monotone_terminal(&harness.store.pipeline_status_history(10));
}
