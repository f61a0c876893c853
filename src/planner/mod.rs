//! Task planning: graph/store merge and the schedulable-set seam.
//!
//! The planner is pure and side-effect free; it may be called repeatedly
//! with the same inputs and must return the same answer. Filtering out
//! tasks already in flight is the reconciler's job, not the planner's.

use crate::core::{Pipeline, Task};
use crate::errors::ReconcileError;
use crate::store::Store;
use async_trait::async_trait;
use std::collections::HashMap;

/// Returns the authoritative task list for a pipeline.
///
/// The union of graph-declared tasks and persisted task rows: a store row
/// wins (its status is authoritative), a spec without a row synthesizes an
/// `Analyzed` task. Output follows graph declaration order; rows without a
/// spec (should not happen in practice) are appended in store order.
pub async fn merge_graph_and_store_tasks(
    store: &dyn Store,
    pipeline: &Pipeline,
) -> Result<Vec<Task>, ReconcileError> {
    let rows = store.list_tasks(pipeline.id()).await?;
    let mut by_name: HashMap<&str, &Task> = HashMap::new();
    for row in &rows {
        by_name.insert(row.name.as_str(), row);
    }

    let mut merged = Vec::with_capacity(pipeline.specs.len());
    for spec in &pipeline.specs {
        match by_name.remove(spec.name.as_str()) {
            Some(row) => merged.push(row.clone()),
            None => merged.push(Task::from_spec(pipeline.id(), spec)),
        }
    }
    for row in &rows {
        if by_name.contains_key(row.name.as_str()) {
            merged.push(row.clone());
        }
    }
    Ok(merged)
}

/// Decides which tasks are currently eligible to run.
#[async_trait]
pub trait TaskPlanner: Send + Sync {
    /// Returns the subset of `all_tasks` whose dependencies and conditions
    /// permit execution right now.
    async fn schedulable_tasks(
        &self,
        pipeline: &Pipeline,
        all_tasks: &[Task],
    ) -> Result<Vec<Task>, ReconcileError>;
}

/// The default planner: dependency-satisfaction over the merged task list.
///
/// A task is schedulable iff it has not been started and every declared
/// dependency has reached a terminal status. A dependency name that does
/// not resolve to a task keeps its dependents unschedulable rather than
/// failing the plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepPlanner;

impl DepPlanner {
    /// Creates a new dependency planner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskPlanner for DepPlanner {
    async fn schedulable_tasks(
        &self,
        _pipeline: &Pipeline,
        all_tasks: &[Task],
    ) -> Result<Vec<Task>, ReconcileError> {
        let by_name: HashMap<&str, &Task> =
            all_tasks.iter().map(|t| (t.name.as_str(), t)).collect();

        let schedulable = all_tasks
            .iter()
            .filter(|task| task.status.is_not_started())
            .filter(|task| {
                task.deps.iter().all(|dep| {
                    by_name
                        .get(dep.as_str())
                        .is_some_and(|d| d.status.is_terminal())
                })
            })
            .cloned()
            .collect();
        Ok(schedulable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PipelineStatus, TaskSpec};
    use crate::store::InMemoryStore;

    fn pipeline_with_chain() -> Pipeline {
        Pipeline::new(
            1,
            "ns-1",
            vec![
                TaskSpec::new("a"),
                TaskSpec::new("b").with_dep("a"),
                TaskSpec::new("c"),
            ],
        )
    }

    #[tokio::test]
    async fn test_merge_synthesizes_missing_rows() {
        let store = InMemoryStore::new();
        let pipeline = pipeline_with_chain();
        store.insert_pipeline(pipeline.clone());

        let merged = merge_graph_and_store_tasks(&store, &pipeline).await.unwrap();
        let names: Vec<&str> = merged.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(merged.iter().all(|t| t.status == PipelineStatus::Analyzed));
    }

    #[tokio::test]
    async fn test_merge_prefers_store_rows() {
        let store = InMemoryStore::new();
        let pipeline = pipeline_with_chain();
        store.insert_pipeline(pipeline.clone());

        let mut row = Task::from_spec(1, &pipeline.specs[0]);
        row.status = PipelineStatus::Success;
        store.upsert_task(&row).await.unwrap();

        let merged = merge_graph_and_store_tasks(&store, &pipeline).await.unwrap();
        assert_eq!(merged[0].status, PipelineStatus::Success);
        assert_eq!(merged[1].status, PipelineStatus::Analyzed);
    }

    #[tokio::test]
    async fn test_planner_holds_back_blocked_deps() {
        let pipeline = pipeline_with_chain();
        let all_tasks: Vec<Task> = pipeline
            .specs
            .iter()
            .map(|s| Task::from_spec(1, s))
            .collect();

        let schedulable = DepPlanner::new()
            .schedulable_tasks(&pipeline, &all_tasks)
            .await
            .unwrap();
        let names: Vec<&str> = schedulable.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_planner_releases_after_dep_terminal() {
        let pipeline = pipeline_with_chain();
        let mut all_tasks: Vec<Task> = pipeline
            .specs
            .iter()
            .map(|s| Task::from_spec(1, s))
            .collect();
        all_tasks[0].status = PipelineStatus::Failed;
        all_tasks[2].status = PipelineStatus::Success;

        let schedulable = DepPlanner::new()
            .schedulable_tasks(&pipeline, &all_tasks)
            .await
            .unwrap();
        let names: Vec<&str> = schedulable.iter().map(|t| t.name.as_str()).collect();
        // "b" becomes schedulable once "a" is terminal, whatever the outcome;
        // its worker decides whether the failed dependency skips it.
        assert_eq!(names, vec!["b"]);
    }

    #[tokio::test]
    async fn test_planner_skips_running_tasks() {
        let pipeline = pipeline_with_chain();
        let mut all_tasks: Vec<Task> = pipeline
            .specs
            .iter()
            .map(|s| Task::from_spec(1, s))
            .collect();
        all_tasks[0].status = PipelineStatus::Running;

        let schedulable = DepPlanner::new()
            .schedulable_tasks(&pipeline, &all_tasks)
            .await
            .unwrap();
        let names: Vec<&str> = schedulable.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["c"]);
    }

    #[tokio::test]
    async fn test_planner_unknown_dep_blocks() {
        let pipeline = Pipeline::new(1, "ns", vec![TaskSpec::new("x").with_dep("ghost")]);
        let all_tasks = vec![Task::from_spec(1, &pipeline.specs[0])];

        let schedulable = DepPlanner::new()
            .schedulable_tasks(&pipeline, &all_tasks)
            .await
            .unwrap();
        assert!(schedulable.is_empty());
    }
}
