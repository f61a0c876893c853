//! Durable task entity and its graph-declared counterpart.

use super::PipelineStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task as declared in the pipeline graph definition.
///
/// Specs carry structure only; authoritative status always comes from the
/// store row once one exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task name, unique within the pipeline.
    pub name: String,
    /// Names of tasks that must reach a terminal status first.
    #[serde(default)]
    pub deps: Vec<String>,
}

impl TaskSpec {
    /// Creates a spec without dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deps: Vec::new(),
        }
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dep(mut self, dep: impl Into<String>) -> Self {
        self.deps.push(dep.into());
        self
    }
}

/// A durable task row.
///
/// Mutated only by the single worker dispatched for it; the reconciler
/// reads task rows to aggregate pipeline status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Owning pipeline.
    pub pipeline_id: u64,
    /// Task name, unique within the pipeline.
    pub name: String,
    /// Current status; "reconciled" means terminal.
    pub status: PipelineStatus,
    /// Dependency names copied from the graph definition.
    #[serde(default)]
    pub deps: Vec<String>,
    /// When the worker began executing the task.
    pub time_begin: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub time_end: Option<DateTime<Utc>>,
}

impl Task {
    /// Synthesizes a task from its graph spec.
    ///
    /// Used when no durable row exists yet; such tasks start `Analyzed`.
    #[must_use]
    pub fn from_spec(pipeline_id: u64, spec: &TaskSpec) -> Self {
        Self {
            pipeline_id,
            name: spec.name.clone(),
            status: PipelineStatus::Analyzed,
            deps: spec.deps.clone(),
            time_begin: None,
            time_end: None,
        }
    }
}
