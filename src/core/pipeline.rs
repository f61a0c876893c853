//! Durable pipeline entity.

use super::{PipelineStatus, TaskSpec};
use crate::utils::now_utc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default TTL for namespace resource garbage collection, in seconds.
pub const DEFAULT_GC_TTL_SECS: u64 = 1800;

/// The base columns of a pipeline row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineBase {
    /// Stable numeric identifier.
    pub id: u64,
    /// Current pipeline status; never changes once terminal.
    pub status: PipelineStatus,
    /// When execution began.
    pub time_begin: Option<DateTime<Utc>>,
    /// When execution ended; set exactly once, at the terminal transition.
    pub time_end: Option<DateTime<Utc>>,
    /// Wall-clock cost in whole seconds; -1 when not yet known.
    pub cost_time_sec: i64,
}

/// The extra bag of a pipeline row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExtra {
    /// Resource namespace the pipeline's tasks execute in.
    pub namespace: String,
    /// Durable marker: teardown has attempted all of its side effects.
    pub complete_reconciler_teardown: bool,
    /// TTL handed to the resource GC when reclaiming the namespace.
    #[serde(default = "default_gc_ttl")]
    pub gc_ttl_secs: u64,
}

fn default_gc_ttl() -> u64 {
    DEFAULT_GC_TTL_SECS
}

impl Default for PipelineExtra {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            complete_reconciler_teardown: false,
            gc_ttl_secs: DEFAULT_GC_TTL_SECS,
        }
    }
}

/// A durable pipeline: base columns, extra bag, and the graph definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Base columns, persisted via `Store::update_pipeline_base`.
    pub base: PipelineBase,
    /// Extra bag, persisted via `Store::update_pipeline_extra`.
    pub extra: PipelineExtra,
    /// The user on whose behalf the pipeline runs; attached to events.
    pub user_id: Option<String>,
    /// Graph-declared tasks (name + dependencies), parsed upstream.
    pub specs: Vec<TaskSpec>,
}

impl Pipeline {
    /// Creates a queued pipeline from its graph definition.
    #[must_use]
    pub fn new(id: u64, namespace: impl Into<String>, specs: Vec<TaskSpec>) -> Self {
        Self {
            base: PipelineBase {
                id,
                status: PipelineStatus::Queue,
                time_begin: Some(now_utc()),
                time_end: None,
                cost_time_sec: -1,
            },
            extra: PipelineExtra {
                namespace: namespace.into(),
                ..PipelineExtra::default()
            },
            user_id: None,
            specs,
        }
    }

    /// Sets the user id.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Returns the pipeline id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.base.id
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.base.status
    }

    /// Returns the GC TTL for the pipeline's namespace.
    #[must_use]
    pub fn resource_gc_ttl(&self) -> u64 {
        self.extra.gc_ttl_secs
    }

    /// Computes wall-clock cost in whole seconds.
    ///
    /// Returns -1 unless both endpoints are set; cost is only known once
    /// execution has begun and ended.
    #[must_use]
    pub fn cost_time_sec(&self) -> i64 {
        let (Some(begin), Some(end)) = (self.base.time_begin, self.base.time_end) else {
            return -1;
        };
        (end - begin).num_seconds()
    }
}
