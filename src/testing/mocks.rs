//! Mock collaborators for reconciler tests.

use crate::core::{Pipeline, PipelineStatus, Task};
use crate::reconciler::{CancelFlag, TaskExecutor};
use crate::store::Store;
use crate::utils::now_utc;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A task executor driven by a per-task script.
///
/// Each task finishes with its scripted terminal status (default
/// `Success`), optionally after a delay during which the cancel flag is
/// polled; cancellation mid-delay finishes the task as `StopByUser`.
/// Records call counts and start/end instants for ordering assertions.
pub struct ScriptedTaskExecutor {
    store: Arc<dyn Store>,
    outcomes: Mutex<HashMap<String, PipelineStatus>>,
    delays: Mutex<HashMap<String, Duration>>,
    call_counts: Mutex<HashMap<String, usize>>,
    starts: Mutex<Vec<(String, Instant)>>,
    ends: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedTaskExecutor {
    /// Creates an executor writing task rows through the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            outcomes: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            call_counts: Mutex::new(HashMap::new()),
            starts: Mutex::new(Vec::new()),
            ends: Mutex::new(Vec::new()),
        }
    }

    /// Scripts the terminal status for a task name.
    pub fn script(&self, name: impl Into<String>, status: PipelineStatus) {
        self.outcomes.lock().insert(name.into(), status);
    }

    /// Scripts an execution delay for a task name.
    pub fn script_delay(&self, name: impl Into<String>, delay: Duration) {
        self.delays.lock().insert(name.into(), delay);
    }

    /// Returns how many times the task was executed.
    #[must_use]
    pub fn call_count(&self, name: &str) -> usize {
        self.call_counts.lock().get(name).copied().unwrap_or(0)
    }

    /// Returns the total number of executions across all tasks.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.call_counts.lock().values().sum()
    }

    /// Returns task names in the order their executions started.
    #[must_use]
    pub fn started_order(&self) -> Vec<String> {
        self.starts.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Returns the instant at which the task's execution started.
    #[must_use]
    pub fn started_at(&self, name: &str) -> Option<Instant> {
        self.starts
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, at)| *at)
    }

    /// Returns the instant at which the task's execution ended.
    #[must_use]
    pub fn ended_at(&self, name: &str) -> Option<Instant> {
        self.ends
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, at)| *at)
    }

    async fn write_row(&self, row: &Task) {
        // Mock writes are best-effort; scripted store failures must not
        // wedge the worker.
        let _ = self.store.upsert_task(row).await;
    }
}

#[async_trait]
impl TaskExecutor for ScriptedTaskExecutor {
    async fn run_until_done(&self, _pipeline: &Pipeline, task: &Task, canceling: &CancelFlag) {
        *self.call_counts.lock().entry(task.name.clone()).or_insert(0) += 1;
        self.starts.lock().push((task.name.clone(), Instant::now()));

        let mut row = task.clone();
        row.status = PipelineStatus::Running;
        row.time_begin = Some(now_utc());
        self.write_row(&row).await;

        let delay = self.delays.lock().get(&task.name).copied();
        let mut interrupted = canceling.is_canceled();
        if let Some(delay) = delay {
            let deadline = Instant::now() + delay;
            while Instant::now() < deadline {
                if canceling.is_canceled() {
                    interrupted = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }

        row.status = if interrupted {
            PipelineStatus::StopByUser
        } else {
            self.outcomes
                .lock()
                .get(&task.name)
                .copied()
                .unwrap_or(PipelineStatus::Success)
        };
        row.time_end = Some(now_utc());
        self.write_row(&row).await;

        self.ends.lock().push((task.name.clone(), Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskSpec;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_scripted_outcome_and_counting() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = Pipeline::new(1, "ns", vec![TaskSpec::new("a")]);
        store.insert_pipeline(pipeline.clone());

        let executor = ScriptedTaskExecutor::new(store.clone());
        executor.script("a", PipelineStatus::Failed);

        let task = Task::from_spec(1, &pipeline.specs[0]);
        executor
            .run_until_done(&pipeline, &task, &CancelFlag::new())
            .await;

        assert_eq!(executor.call_count("a"), 1);
        assert_eq!(executor.total_calls(), 1);
        assert_eq!(store.task(1, "a").unwrap().status, PipelineStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_mid_delay_stops_task() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = Pipeline::new(1, "ns", vec![TaskSpec::new("slow")]);
        store.insert_pipeline(pipeline.clone());

        let executor = Arc::new(ScriptedTaskExecutor::new(store.clone()));
        executor.script_delay("slow", Duration::from_secs(30));

        let flag = Arc::new(CancelFlag::new());
        let task = Task::from_spec(1, &pipeline.specs[0]);

        let worker = {
            let executor = executor.clone();
            let flag = flag.clone();
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                executor.run_until_done(&pipeline, &task, &flag).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        flag.cancel("test cancel");
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            store.task(1, "slow").unwrap().status,
            PipelineStatus::StopByUser
        );
    }
}
