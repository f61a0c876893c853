//! The per-pipeline reconciler.
//!
//! One `DefaultPipelineReconciler` drives one pipeline from `Queue` to a
//! terminal status: it plans the schedulable task set, dispatches one
//! worker per eligible task, aggregates task rows into a pipeline status,
//! and tears the pipeline down when no work remains.
//!
//! Re-planning is trigger-driven. A capacity-1 channel carries "something
//! changed, plan again" signals; the reconcile loop is its only consumer,
//! so at most one planning pass runs at a time without holding a lock
//! across store calls. Workers send a trigger when their task finishes;
//! completing workers serialize on the channel send.

use super::{
    continue_working, CancelFlag, ContinueOptions, ContinueResult, ShutdownToken, TaskExecutor,
    WorkOutcome,
};
use crate::collaborators::{ContextCache, CronCompensator, NoOpCollaborator, PostExecHook, ResourceGc};
use crate::config::ReconcilerConfig;
use crate::core::{all_tasks_done, reduce_task_statuses, Pipeline, PipelineStatus, Task};
use crate::errors::ReconcileError;
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::metrics::{MetricsSink, NoOpMetricsSink};
use crate::planner::{merge_graph_and_store_tasks, DepPlanner, TaskPlanner};
use crate::store::Store;
use crate::utils::now_utc;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The operations a pipeline reconciler exposes to the engine.
#[async_trait]
pub trait PipelineReconciler: Send + Sync {
    /// Returns true if the pipeline still needs reconciliation.
    fn need_reconcile(&self, pipeline: &Pipeline) -> bool;

    /// Returns true if the pipeline has reached a terminal status.
    fn is_reconcile_done(&self, pipeline: &Pipeline) -> bool;

    /// Transitions the pipeline to `Running` (durably, with retry) and
    /// fires the first planning trigger.
    async fn prepare_before_reconcile(&self, pipeline: &mut Pipeline)
        -> Result<(), ReconcileError>;

    /// Returns the tasks eligible to run now, excluding any already
    /// dispatched by this reconciler.
    async fn get_tasks_can_be_concurrently_scheduled(
        &self,
        pipeline: &Pipeline,
    ) -> Result<Vec<Task>, ReconcileError>;

    /// Worker body: runs one task to a terminal status, then re-triggers
    /// the planning loop.
    async fn reconcile_one_schedulable_task(&self, pipeline: &Pipeline, task: Task);

    /// Persists the aggregated pipeline status if it changed and is
    /// terminal-worthy; emits the pipeline instance event on transition.
    async fn update_current_reconcile_status_if_necessary(
        &self,
        pipeline: &mut Pipeline,
    ) -> Result<(), ReconcileError>;

    /// Runs the deterministic post-terminal cleanup sequence.
    async fn teardown_after_reconcile_done(&self, pipeline: &mut Pipeline);

    /// Raises the sticky canceling flag. Returns immediately; workers and
    /// the aggregator observe the flag asynchronously.
    fn cancel_reconcile(&self);
}

/// Aggregate state guarded by the per-reconciler mutex.
struct ReconcilerState {
    /// Tri-state: unknown until the merger has run once, then memoized.
    have_task: Option<bool>,
    /// Total declared tasks; valid once `have_task` is set.
    task_count: usize,
    /// Last reduction over the persisted task rows.
    aggregated_status: PipelineStatus,
}

impl Default for ReconcilerState {
    fn default() -> Self {
        Self {
            have_task: None,
            task_count: 0,
            aggregated_status: PipelineStatus::Running,
        }
    }
}

type SignalReceivers = (mpsc::Receiver<()>, mpsc::Receiver<()>);

/// The default pipeline reconciler. One instance per running pipeline.
pub struct DefaultPipelineReconciler {
    config: ReconcilerConfig,
    store: Arc<dyn Store>,
    executor: Arc<dyn TaskExecutor>,
    planner: Arc<dyn TaskPlanner>,
    events: Arc<dyn EventSink>,
    metrics: Arc<dyn MetricsSink>,
    resource_gc: Arc<dyn ResourceGc>,
    cron: Arc<dyn CronCompensator>,
    cache: Arc<dyn ContextCache>,
    post_exec: Arc<dyn PostExecHook>,

    continue_opts: ContinueOptions,
    state: Mutex<ReconcilerState>,
    /// Leased set of dispatched task names. Entries are never removed:
    /// a name present here has had its one worker.
    processing_tasks: DashMap<String, ()>,
    /// Workers dispatched and not yet finished.
    in_flight: AtomicUsize,
    canceling: CancelFlag,
    shutdown: ShutdownToken,

    trigger_tx: mpsc::Sender<()>,
    done_tx: mpsc::Sender<()>,
    receivers: Mutex<Option<SignalReceivers>>,
}

impl DefaultPipelineReconciler {
    /// Creates a reconciler over the given store and task executor, with
    /// no-op sinks and collaborators. Wire real ones with the `with_*`
    /// setters.
    #[must_use]
    pub fn new(
        config: ReconcilerConfig,
        store: Arc<dyn Store>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = mpsc::channel(1);
        let continue_opts = ContinueOptions::new()
            .with_default_interval(config.retry_interval())
            .with_jitter(config.retry_jitter);
        Self {
            config,
            store,
            executor,
            planner: Arc::new(DepPlanner::new()),
            events: Arc::new(NoOpEventSink),
            metrics: Arc::new(NoOpMetricsSink),
            resource_gc: Arc::new(NoOpCollaborator),
            cron: Arc::new(NoOpCollaborator),
            cache: Arc::new(NoOpCollaborator),
            post_exec: Arc::new(NoOpCollaborator),
            continue_opts,
            state: Mutex::new(ReconcilerState::default()),
            processing_tasks: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            canceling: CancelFlag::new(),
            shutdown: ShutdownToken::new(),
            trigger_tx,
            done_tx,
            receivers: Mutex::new(Some((trigger_rx, done_rx))),
        }
    }

    /// Sets the task planner.
    #[must_use]
    pub fn with_planner(mut self, planner: Arc<dyn TaskPlanner>) -> Self {
        self.planner = planner;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the metrics sink.
    #[must_use]
    pub fn with_metrics_sink(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the resource GC collaborator.
    #[must_use]
    pub fn with_resource_gc(mut self, resource_gc: Arc<dyn ResourceGc>) -> Self {
        self.resource_gc = resource_gc;
        self
    }

    /// Sets the cron compensator.
    #[must_use]
    pub fn with_cron_compensator(mut self, cron: Arc<dyn CronCompensator>) -> Self {
        self.cron = cron;
        self
    }

    /// Sets the context cache collaborator.
    #[must_use]
    pub fn with_context_cache(mut self, cache: Arc<dyn ContextCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the after-exec hook.
    #[must_use]
    pub fn with_post_exec_hook(mut self, post_exec: Arc<dyn PostExecHook>) -> Self {
        self.post_exec = post_exec;
        self
    }

    /// Returns a clone of the external shutdown token.
    #[must_use]
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Returns whether the canceling flag has been raised.
    #[must_use]
    pub fn is_canceling(&self) -> bool {
        self.canceling.is_canceled()
    }

    /// Drives the pipeline to a terminal status and through teardown.
    ///
    /// Returns immediately for already-terminal pipelines. Returns
    /// `ReconcileError::Shutdown` when the external shutdown token fires;
    /// in that case teardown is abandoned, not half-run. All other errors
    /// are absorbed by the loop's retry behavior.
    pub async fn reconcile(
        self: Arc<Self>,
        pipeline: &mut Pipeline,
    ) -> Result<(), ReconcileError> {
        if !self.need_reconcile(pipeline) {
            info!(
                pipeline_id = pipeline.id(),
                status = %pipeline.status(),
                "pipeline already terminal, nothing to reconcile"
            );
            return Ok(());
        }
        let Some((mut trigger_rx, mut done_rx)) = self.receivers.lock().take() else {
            warn!(
                pipeline_id = pipeline.id(),
                "reconcile invoked twice on one reconciler"
            );
            return Ok(());
        };

        self.prepare_before_reconcile(pipeline).await?;

        loop {
            tokio::select! {
                Some(()) = trigger_rx.recv() => {
                    Self::handle_trigger(&self, pipeline).await;
                }
                Some(()) = done_rx.recv() => {
                    self.teardown_after_reconcile_done(pipeline).await;
                    return Ok(());
                }
                () = self.shutdown.wait() => {
                    warn!(pipeline_id = pipeline.id(), "shutdown signaled, abandoning reconcile");
                    return Err(ReconcileError::Shutdown(format!(
                        "pipeline {}",
                        pipeline.id()
                    )));
                }
            }
        }
    }

    async fn handle_trigger(this: &Arc<Self>, pipeline: &mut Pipeline) {
        if let Err(err) = this.calculate_status_by_all_reconciled_tasks(pipeline).await {
            warn!(pipeline_id = pipeline.id(), %err, "status aggregation failed, will retry");
            this.schedule_delayed_trigger();
            return;
        }
        if let Err(err) = this
            .update_current_reconcile_status_if_necessary(pipeline)
            .await
        {
            warn!(pipeline_id = pipeline.id(), %err, "status persist failed, will retry");
            this.schedule_delayed_trigger();
            return;
        }
        match this.get_tasks_can_be_concurrently_scheduled(pipeline).await {
            Err(err) => {
                warn!(pipeline_id = pipeline.id(), %err, "planning failed, will retry");
                this.schedule_delayed_trigger();
            }
            Ok(tasks) => {
                let aggregated_terminal = this.state.lock().aggregated_status.is_terminal();
                if tasks.is_empty()
                    && this.in_flight.load(Ordering::SeqCst) == 0
                    && aggregated_terminal
                {
                    let _ = this.done_tx.try_send(());
                } else {
                    for task in tasks {
                        this.in_flight.fetch_add(1, Ordering::SeqCst);
                        let worker = Arc::clone(this);
                        let pipeline_snapshot = pipeline.clone();
                        tokio::spawn(async move {
                            worker
                                .reconcile_one_schedulable_task(&pipeline_snapshot, task)
                                .await;
                        });
                    }
                }
            }
        }
    }

    /// Recomputes the aggregated pipeline status from persisted task rows.
    ///
    /// Runs the merger exactly once per reconciler lifetime to memoize
    /// whether the pipeline has tasks at all; afterwards only `list_tasks`
    /// is consulted. Serialized against cancellation by the state mutex.
    async fn calculate_status_by_all_reconciled_tasks(
        &self,
        pipeline: &Pipeline,
    ) -> Result<(), ReconcileError> {
        if self.state.lock().have_task.is_none() {
            let all_tasks = merge_graph_and_store_tasks(self.store.as_ref(), pipeline).await?;
            let mut state = self.state.lock();
            if state.have_task.is_none() {
                state.have_task = Some(!all_tasks.is_empty());
                state.task_count = all_tasks.len();
            }
        }

        let rows = self.store.list_tasks(pipeline.id()).await?;
        let statuses: Vec<PipelineStatus> = rows.iter().map(|t| t.status).collect();

        let mut state = self.state.lock();
        let mut reduced = reduce_task_statuses(&statuses);
        // Graph-declared tasks may not have rows yet; a reduction over the
        // written subset must not read as overall success.
        if reduced.is_success() && rows.len() < state.task_count {
            reduced = PipelineStatus::Running;
        }
        if self.canceling.is_canceled() {
            reduced = PipelineStatus::StopByUser;
        }
        state.aggregated_status = reduced;
        Ok(())
    }

    fn fire_trigger(&self) {
        let tx = self.trigger_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(()).await;
        });
    }

    fn schedule_delayed_trigger(&self) {
        let tx = self.trigger_tx.clone();
        let delay = self.config.retry_interval();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(()).await;
        });
    }
}

#[async_trait]
impl PipelineReconciler for DefaultPipelineReconciler {
    fn need_reconcile(&self, pipeline: &Pipeline) -> bool {
        !pipeline.status().is_terminal()
    }

    fn is_reconcile_done(&self, pipeline: &Pipeline) -> bool {
        !self.need_reconcile(pipeline)
    }

    async fn prepare_before_reconcile(
        &self,
        pipeline: &mut Pipeline,
    ) -> Result<(), ReconcileError> {
        if !pipeline.status().is_after_queue() {
            let outcome = continue_working(&self.shutdown, &self.continue_opts, || {
                let store = self.store.clone();
                let pipeline_id = pipeline.id();
                async move {
                    match store
                        .update_pipeline_status(pipeline_id, PipelineStatus::Running)
                        .await
                    {
                        Ok(()) => WorkOutcome::Abort,
                        Err(err) => {
                            warn!(
                                pipeline_id,
                                %err,
                                "failed to update pipeline status before reconcile (auto retry)"
                            );
                            WorkOutcome::ContinueWithDefaultInterval
                        }
                    }
                }
            })
            .await;
            if outcome == ContinueResult::Shutdown {
                return Err(ReconcileError::Shutdown(format!(
                    "pipeline {} prepare interrupted",
                    pipeline.id()
                )));
            }
            info!(
                pipeline_id = pipeline.id(),
                "update pipeline status ({} -> {})",
                pipeline.status(),
                PipelineStatus::Running
            );
            pipeline.base.status = PipelineStatus::Running;
            self.events.try_emit(PipelineEvent::instance(pipeline));
        }

        // First trigger goes through a spawned task: sending inline would
        // deadlock the caller against the capacity-1 channel it is about
        // to start consuming.
        self.fire_trigger();
        Ok(())
    }

    async fn get_tasks_can_be_concurrently_scheduled(
        &self,
        pipeline: &Pipeline,
    ) -> Result<Vec<Task>, ReconcileError> {
        let all_tasks = merge_graph_and_store_tasks(self.store.as_ref(), pipeline).await?;

        if self.canceling.is_canceled() {
            return Ok(Vec::new());
        }

        let schedulable = self.planner.schedulable_tasks(pipeline, &all_tasks).await?;

        let mut filtered = Vec::new();
        for task in schedulable {
            let newly_leased = self.processing_tasks.insert(task.name.clone(), ()).is_none();
            if newly_leased {
                filtered.push(task);
            }
        }

        let mut names: Vec<&str> = filtered.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        info!(
            pipeline_id = pipeline.id(),
            schedulable = %names.join(", "),
            "schedulable tasks"
        );

        Ok(filtered)
    }

    async fn reconcile_one_schedulable_task(&self, pipeline: &Pipeline, task: Task) {
        self.executor
            .run_until_done(pipeline, &task, &self.canceling)
            .await;

        if let Err(err) = self.calculate_status_by_all_reconciled_tasks(pipeline).await {
            warn!(
                pipeline_id = pipeline.id(),
                task = %task.name,
                %err,
                "aggregation after task completion failed, next trigger retries"
            );
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let _ = self.trigger_tx.send(()).await;
    }

    async fn update_current_reconcile_status_if_necessary(
        &self,
        pipeline: &mut Pipeline,
    ) -> Result<(), ReconcileError> {
        // Terminal is forever: never write over it, never re-emit.
        if pipeline.status().is_terminal() {
            return Ok(());
        }

        let aggregated = self.state.lock().aggregated_status;
        let candidate = if aggregated.is_terminal() {
            aggregated
        } else {
            let all_tasks = merge_graph_and_store_tasks(self.store.as_ref(), pipeline).await?;
            let statuses: Vec<PipelineStatus> = all_tasks.iter().map(|t| t.status).collect();
            if !all_tasks_done(&statuses) {
                return Ok(());
            }
            reduce_task_statuses(&statuses)
        };

        if pipeline.status() == candidate {
            return Ok(());
        }

        self.store
            .update_pipeline_status(pipeline.id(), candidate)
            .await?;
        info!(
            pipeline_id = pipeline.id(),
            "update pipeline status ({} -> {})",
            pipeline.status(),
            candidate
        );
        pipeline.base.status = candidate;
        self.events.try_emit(PipelineEvent::instance(pipeline));
        Ok(())
    }

    async fn teardown_after_reconcile_done(&self, pipeline: &mut Pipeline) {
        info!(pipeline_id = pipeline.id(), "begin teardown");

        // End time and cost are set exactly once; only the write retries.
        if pipeline.base.time_end.is_none() {
            pipeline.base.time_end = Some(now_utc());
            pipeline.base.cost_time_sec = pipeline.cost_time_sec();
            let base = pipeline.base.clone();
            continue_working(&self.shutdown, &self.continue_opts, || {
                let store = self.store.clone();
                let base = base.clone();
                async move {
                    match store.update_pipeline_base(base.id, &base).await {
                        Ok(()) => WorkOutcome::Abort,
                        Err(err) => {
                            warn!(
                                pipeline_id = base.id,
                                %err,
                                "failed to update pipeline end time (auto retry)"
                            );
                            WorkOutcome::ContinueWithDefaultInterval
                        }
                    }
                }
            })
            .await;
        }

        // After-exec hook: one attempt, failure must not stall teardown.
        continue_working(&self.shutdown, &self.continue_opts, || {
            let post_exec = self.post_exec.clone();
            let snapshot = pipeline.clone();
            async move {
                if let Err(err) = post_exec.handle(&snapshot).await {
                    warn!(pipeline_id = snapshot.id(), %err, "after-exec hook failed");
                }
                WorkOutcome::Abort
            }
        })
        .await;

        self.metrics.pipeline_total_add(pipeline, 1).await;
        self.metrics.pipeline_processing_add(pipeline, -1).await;
        self.metrics.pipeline_end_event(pipeline).await;

        self.cron.pipeline_cron_compensate(pipeline.id()).await;
        self.resource_gc
            .wait_gc(
                &pipeline.extra.namespace,
                pipeline.id(),
                pipeline.resource_gc_ttl(),
            )
            .await;
        self.cache
            .clear_reconciler_pipeline_context_caches(pipeline.id());

        // The completion marker is the last write: once durable, every
        // earlier teardown step has been attempted at least once.
        if !pipeline.extra.complete_reconciler_teardown {
            pipeline.extra.complete_reconciler_teardown = true;
            let extra = pipeline.extra.clone();
            let pipeline_id = pipeline.id();
            let retry_interval = self.config.retry_interval();
            continue_working(&self.shutdown, &self.continue_opts, || {
                let store = self.store.clone();
                let extra = extra.clone();
                async move {
                    match store.update_pipeline_extra(pipeline_id, &extra).await {
                        Ok(()) => WorkOutcome::Abort,
                        Err(err) => {
                            warn!(
                                pipeline_id,
                                %err,
                                "failed to persist teardown marker (auto retry)"
                            );
                            WorkOutcome::ContinueWithCustomInterval(retry_interval)
                        }
                    }
                }
            })
            .await;
        }

        info!(pipeline_id = pipeline.id(), "end teardown");
    }

    fn cancel_reconcile(&self) {
        // Taking the state mutex serializes the flip against any
        // aggregation pass reading the flag.
        let _state = self.state.lock();
        self.canceling.cancel("canceled by user");
    }
}
