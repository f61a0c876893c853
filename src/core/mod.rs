//! Durable data model: statuses, pipelines, and tasks.

mod pipeline;
mod status;
mod task;

pub use pipeline::{Pipeline, PipelineBase, PipelineExtra, DEFAULT_GC_TTL_SECS};
pub use status::{all_tasks_done, reduce_task_statuses, PipelineStatus};
pub use task::{Task, TaskSpec};
