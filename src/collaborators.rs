//! Teardown collaborators.
//!
//! Each seam wraps a service the engine calls during teardown. Failures in
//! these collaborators must not wedge a pipeline: the reconciler bounds its
//! attempts and proceeds.

use crate::core::Pipeline;
use async_trait::async_trait;
use tracing::debug;

/// Reclaims the resources of a pipeline's namespace.
#[async_trait]
pub trait ResourceGc: Send + Sync {
    /// Blocks until the namespace is scheduled for reclamation.
    async fn wait_gc(&self, namespace: &str, pipeline_id: u64, ttl_secs: u64);
}

/// Compensates cron schedules after a pipeline finishes.
#[async_trait]
pub trait CronCompensator: Send + Sync {
    /// Notifies the compensator that the pipeline reached a terminal status.
    async fn pipeline_cron_compensate(&self, pipeline_id: u64);
}

/// Reconciler-scoped caches keyed by pipeline.
pub trait ContextCache: Send + Sync {
    /// Drops every cache entry belonging to the pipeline.
    fn clear_reconciler_pipeline_context_caches(&self, pipeline_id: u64);
}

/// The after-exec extension hook.
#[async_trait]
pub trait PostExecHook: Send + Sync {
    /// Runs extension logic after the pipeline reaches a terminal status.
    ///
    /// Errors are reported to the caller, which logs and proceeds; a hook
    /// must not assume it blocks teardown.
    async fn handle(&self, pipeline: &Pipeline) -> Result<(), String>;
}

/// No-op implementations, used when a collaborator is not wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCollaborator;

#[async_trait]
impl ResourceGc for NoOpCollaborator {
    async fn wait_gc(&self, namespace: &str, pipeline_id: u64, ttl_secs: u64) {
        debug!(namespace, pipeline_id, ttl_secs, "resource gc skipped");
    }
}

#[async_trait]
impl CronCompensator for NoOpCollaborator {
    async fn pipeline_cron_compensate(&self, pipeline_id: u64) {
        debug!(pipeline_id, "cron compensation skipped");
    }
}

impl ContextCache for NoOpCollaborator {
    fn clear_reconciler_pipeline_context_caches(&self, pipeline_id: u64) {
        debug!(pipeline_id, "context cache clear skipped");
    }
}

#[async_trait]
impl PostExecHook for NoOpCollaborator {
    async fn handle(&self, _pipeline: &Pipeline) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_collaborator_is_inert() {
        let collab = NoOpCollaborator;
        collab.wait_gc("ns", 1, 60).await;
        collab.pipeline_cron_compensate(1).await;
        collab.clear_reconciler_pipeline_context_caches(1);
        assert!(collab.handle(&Pipeline::new(1, "ns", vec![])).await.is_ok());
    }
}
