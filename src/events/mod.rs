//! Pipeline instance events and the event sink seam.
//!
//! The reconciler emits one `pipeline.instance` event per observed status
//! transition. Delivery is at-least-once; consumers must tolerate
//! duplicates.

use crate::core::Pipeline;
use crate::utils::iso_timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// An event describing the state of a pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Unique event id.
    pub id: Uuid,
    /// The event type (currently always `pipeline.instance`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the event was created (ISO 8601).
    pub timestamp: String,
    /// The pipeline the event describes.
    pub pipeline_id: u64,
    /// Pipeline status at emission time.
    pub status: String,
    /// The user on whose behalf the pipeline runs.
    pub user_id: Option<String>,
    /// Additional payload data.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl PipelineEvent {
    /// Builds a `pipeline.instance` event from a pipeline snapshot.
    #[must_use]
    pub fn instance(pipeline: &Pipeline) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: "pipeline.instance".to_string(),
            timestamp: iso_timestamp(),
            pipeline_id: pipeline.id(),
            status: pipeline.status().to_string(),
            user_id: pipeline.user_id.clone(),
            data: serde_json::json!({
                "namespace": pipeline.extra.namespace,
            }),
        }
    }
}

/// Trait for sinks that receive pipeline events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: PipelineEvent);

    /// Emits an event without blocking and without failing.
    ///
    /// Must never panic; errors are logged and suppressed by the impl.
    fn try_emit(&self, event: PipelineEvent);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: PipelineEvent) {}

    fn try_emit(&self, _event: PipelineEvent) {}
}

/// A sink that logs events through the tracing framework.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl LoggingEventSink {
    fn log_event(event: &PipelineEvent) {
        info!(
            event_id = %event.id,
            pipeline_id = event.pipeline_id,
            status = %event.status,
            "event: {}", event.event_type
        );
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: PipelineEvent) {
        Self::log_event(&event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        Self::log_event(&event);
    }
}

/// A collecting sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the statuses of collected events, in emission order.
    #[must_use]
    pub fn statuses(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.status.clone()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }
}
