//! Reconciler configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a pipeline reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Interval between attempts of a durable write that keeps failing.
    #[serde(default = "default_retry_interval_secs")]
    retry_interval_secs: f64,
    /// Whether the retry helper applies full jitter to its wait interval.
    #[serde(default)]
    pub retry_jitter: bool,
}

fn default_retry_interval_secs() -> f64 {
    5.0
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval_secs(),
            retry_jitter: false,
        }
    }
}

impl ReconcilerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry interval.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_secs = interval.as_secs_f64();
        self
    }

    /// Enables or disables retry jitter.
    #[must_use]
    pub fn with_retry_jitter(mut self, jitter: bool) -> Self {
        self.retry_jitter = jitter;
        self
    }

    /// Returns the retry interval as a `Duration`.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs_f64(self.retry_interval_secs)
    }
}
