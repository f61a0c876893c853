//! In-memory store: the reference implementation and test substrate.

use super::Store;
use crate::core::{Pipeline, PipelineBase, PipelineExtra, PipelineStatus, Task};
use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

/// Store operations that can be failure-scripted in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `update_pipeline_status`
    UpdatePipelineStatus,
    /// `update_pipeline_base`
    UpdatePipelineBase,
    /// `update_pipeline_extra`
    UpdatePipelineExtra,
    /// `list_tasks`
    ListTasks,
    /// `upsert_task`
    UpsertTask,
}

/// An in-memory row store.
///
/// Backs the end-to-end tests and serves as the reference for what the
/// engine expects of a real database. `fail_next` scripts transient
/// failures so retry paths are testable.
#[derive(Default)]
pub struct InMemoryStore {
    pipelines: RwLock<HashMap<u64, Pipeline>>,
    tasks: RwLock<HashMap<(u64, String), Task>>,
    status_history: RwLock<HashMap<u64, Vec<PipelineStatus>>>,
    failures: Mutex<HashMap<StoreOp, u32>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a pipeline row.
    pub fn insert_pipeline(&self, pipeline: Pipeline) {
        self.status_history
            .write()
            .entry(pipeline.id())
            .or_default()
            .push(pipeline.status());
        self.pipelines.write().insert(pipeline.id(), pipeline);
    }

    /// Returns a snapshot of a pipeline row.
    #[must_use]
    pub fn pipeline(&self, pipeline_id: u64) -> Option<Pipeline> {
        self.pipelines.read().get(&pipeline_id).cloned()
    }

    /// Returns a snapshot of a task row.
    #[must_use]
    pub fn task(&self, pipeline_id: u64, name: &str) -> Option<Task> {
        self.tasks
            .read()
            .get(&(pipeline_id, name.to_string()))
            .cloned()
    }

    /// Returns every status the pipeline row has held, oldest first.
    #[must_use]
    pub fn pipeline_status_history(&self, pipeline_id: u64) -> Vec<PipelineStatus> {
        self.status_history
            .read()
            .get(&pipeline_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Scripts the next `count` calls of `op` to fail transiently.
    pub fn fail_next(&self, op: StoreOp, count: u32) {
        self.failures.lock().insert(op, count);
    }

    fn check_failure(&self, op: StoreOp) -> Result<(), StoreError> {
        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Unavailable(format!("scripted failure: {op:?}")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn update_pipeline_status(
        &self,
        pipeline_id: u64,
        status: PipelineStatus,
    ) -> Result<(), StoreError> {
        self.check_failure(StoreOp::UpdatePipelineStatus)?;
        let mut pipelines = self.pipelines.write();
        let pipeline = pipelines
            .get_mut(&pipeline_id)
            .ok_or(StoreError::PipelineNotFound(pipeline_id))?;
        if pipeline.base.status != status {
            pipeline.base.status = status;
            self.status_history
                .write()
                .entry(pipeline_id)
                .or_default()
                .push(status);
        }
        Ok(())
    }

    async fn update_pipeline_base(
        &self,
        pipeline_id: u64,
        base: &PipelineBase,
    ) -> Result<(), StoreError> {
        self.check_failure(StoreOp::UpdatePipelineBase)?;
        let mut pipelines = self.pipelines.write();
        let pipeline = pipelines
            .get_mut(&pipeline_id)
            .ok_or(StoreError::PipelineNotFound(pipeline_id))?;
        if pipeline.base.status != base.status {
            self.status_history
                .write()
                .entry(pipeline_id)
                .or_default()
                .push(base.status);
        }
        pipeline.base = base.clone();
        Ok(())
    }

    async fn update_pipeline_extra(
        &self,
        pipeline_id: u64,
        extra: &PipelineExtra,
    ) -> Result<(), StoreError> {
        self.check_failure(StoreOp::UpdatePipelineExtra)?;
        let mut pipelines = self.pipelines.write();
        let pipeline = pipelines
            .get_mut(&pipeline_id)
            .ok_or(StoreError::PipelineNotFound(pipeline_id))?;
        pipeline.extra = extra.clone();
        Ok(())
    }

    async fn list_tasks(&self, pipeline_id: u64) -> Result<Vec<Task>, StoreError> {
        self.check_failure(StoreOp::ListTasks)?;
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .values()
            .filter(|t| t.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tasks)
    }

    async fn upsert_task(&self, task: &Task) -> Result<(), StoreError> {
        self.check_failure(StoreOp::UpsertTask)?;
        self.tasks
            .write()
            .insert((task.pipeline_id, task.name.clone()), task.clone());
        Ok(())
    }
}
