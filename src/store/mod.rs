//! The row store seam.
//!
//! The engine treats the store as an external collaborator: a row-oriented
//! database scoped per pipeline id and per task name. Writes to a pipeline
//! row come only from its reconciler; writes to a task row come only from
//! the single worker dispatched for it.

mod memory;

pub use memory::{InMemoryStore, StoreOp};

use crate::core::{PipelineBase, PipelineExtra, PipelineStatus, Task};
use crate::errors::StoreError;
use async_trait::async_trait;

/// Durable row operations the reconciler depends on.
#[async_trait]
pub trait Store: Send + Sync {
    /// Updates only the status column of a pipeline row.
    async fn update_pipeline_status(
        &self,
        pipeline_id: u64,
        status: PipelineStatus,
    ) -> Result<(), StoreError>;

    /// Replaces the base columns of a pipeline row.
    async fn update_pipeline_base(
        &self,
        pipeline_id: u64,
        base: &PipelineBase,
    ) -> Result<(), StoreError>;

    /// Replaces the extra bag of a pipeline row.
    async fn update_pipeline_extra(
        &self,
        pipeline_id: u64,
        extra: &PipelineExtra,
    ) -> Result<(), StoreError>;

    /// Lists all persisted task rows for a pipeline.
    ///
    /// Tasks that exist only in the graph definition have no row here.
    async fn list_tasks(&self, pipeline_id: u64) -> Result<Vec<Task>, StoreError>;

    /// Inserts or replaces a task row. Consumed by task workers.
    async fn upsert_task(&self, task: &Task) -> Result<(), StoreError>;
}
