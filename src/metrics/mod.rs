//! Metrics sink seam.
//!
//! Terminal metrics are best-effort: failures are logged by the impl and
//! never block teardown. Duplicates are tolerated.

use crate::core::Pipeline;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

/// Trait for sinks that receive pipeline metrics.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Adds `n` to the total-pipelines counter.
    async fn pipeline_total_add(&self, pipeline: &Pipeline, n: i64);

    /// Adds `delta` to the pipelines-processing gauge.
    async fn pipeline_processing_add(&self, pipeline: &Pipeline, delta: i64);

    /// Records the end-of-pipeline measurement (status, cost time).
    async fn pipeline_end_event(&self, pipeline: &Pipeline);
}

/// A sink that discards all metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetricsSink;

#[async_trait]
impl MetricsSink for NoOpMetricsSink {
    async fn pipeline_total_add(&self, _pipeline: &Pipeline, _n: i64) {}

    async fn pipeline_processing_add(&self, _pipeline: &Pipeline, _delta: i64) {}

    async fn pipeline_end_event(&self, _pipeline: &Pipeline) {}
}

/// A sink that logs measurements through the tracing framework.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMetricsSink;

#[async_trait]
impl MetricsSink for LoggingMetricsSink {
    async fn pipeline_total_add(&self, pipeline: &Pipeline, n: i64) {
        info!(pipeline_id = pipeline.id(), n, "metric: pipeline_total_add");
    }

    async fn pipeline_processing_add(&self, pipeline: &Pipeline, delta: i64) {
        info!(
            pipeline_id = pipeline.id(),
            delta, "metric: pipeline_processing_add"
        );
    }

    async fn pipeline_end_event(&self, pipeline: &Pipeline) {
        info!(
            pipeline_id = pipeline.id(),
            status = %pipeline.status(),
            cost_time_sec = pipeline.cost_time_sec(),
            "metric: pipeline_end_event"
        );
    }
}

/// A collecting sink for tests.
#[derive(Debug, Default)]
pub struct CollectingMetricsSink {
    total: Mutex<i64>,
    processing: Mutex<i64>,
    end_events: Mutex<Vec<(u64, String)>>,
}

impl CollectingMetricsSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter value.
    #[must_use]
    pub fn total(&self) -> i64 {
        *self.total.lock()
    }

    /// Returns the gauge value.
    #[must_use]
    pub fn processing(&self) -> i64 {
        *self.processing.lock()
    }

    /// Returns recorded end events as `(pipeline_id, status)` pairs.
    #[must_use]
    pub fn end_events(&self) -> Vec<(u64, String)> {
        self.end_events.lock().clone()
    }
}

#[async_trait]
impl MetricsSink for CollectingMetricsSink {
    async fn pipeline_total_add(&self, _pipeline: &Pipeline, n: i64) {
        *self.total.lock() += n;
    }

    async fn pipeline_processing_add(&self, _pipeline: &Pipeline, delta: i64) {
        *self.processing.lock() += delta;
    }

    async fn pipeline_end_event(&self, pipeline: &Pipeline) {
        self.end_events
            .lock()
            .push((pipeline.id(), pipeline.status().to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineStatus;

    #[tokio::test]
    async fn test_collecting_sink_accumulates() {
        let sink = CollectingMetricsSink::new();
        let mut p = Pipeline::new(5, "ns-5", vec![]);
        p.base.status = PipelineStatus::Success;

        sink.pipeline_total_add(&p, 1).await;
        sink.pipeline_processing_add(&p, -1).await;
        sink.pipeline_end_event(&p).await;

        assert_eq!(sink.total(), 1);
        assert_eq!(sink.processing(), -1);
        assert_eq!(sink.end_events(), vec![(5, "Success".to_string())]);
    }
}
