//! Error types for the runflow engine.
//!
//! Three kinds of failure flow through the reconciler: transient store
//! errors (retried via the retry helper), planner/merger errors (surfaced
//! to the loop and re-attempted on the next trigger), and hook/metrics
//! errors (logged and swallowed by their emitters, so they never appear
//! here).

use thiserror::Error;

/// Errors returned by the row store seam.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or the write failed transiently.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// No pipeline row exists for the given id.
    #[error("pipeline not found: {0}")]
    PipelineNotFound(u64),

    /// No task row exists for the given pipeline/name pair.
    #[error("task not found: pipeline {pipeline_id}, task '{name}'")]
    TaskNotFound {
        /// The owning pipeline id.
        pipeline_id: u64,
        /// The missing task name.
        name: String,
    },
}

/// The error type surfaced by reconciler operations.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The planner or the graph/store merger failed.
    ///
    /// Non-fatal: the lifecycle driver retries at the next trigger.
    #[error("planner error: {0}")]
    Planner(String),

    /// The external shutdown signal fired; reconciliation was abandoned
    /// without clean teardown.
    #[error("reconcile shut down: {0}")]
    Shutdown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::TaskNotFound {
            pipeline_id: 9,
            name: "deploy".into(),
        };
        assert_eq!(err.to_string(), "task not found: pipeline 9, task 'deploy'");
    }

    #[test]
    fn test_store_error_converts() {
        let err: ReconcileError = StoreError::PipelineNotFound(3).into();
        assert!(matches!(err, ReconcileError::Store(_)));
        assert_eq!(err.to_string(), "pipeline not found: 3");
    }
}
