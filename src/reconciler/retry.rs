//! The retry helper: keep trying a step until it signals abort.
//!
//! Every durable mutation in the engine goes through `continue_working`,
//! so retry-on-transient-failure semantics live in exactly one place.

use super::ShutdownToken;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// What a step wants to happen after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Stop; the step is finished (or has given up on purpose).
    Abort,
    /// Try again after the configured default interval.
    ContinueWithDefaultInterval,
    /// Try again after the given interval.
    ContinueWithCustomInterval(Duration),
}

/// Why `continue_working` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueResult {
    /// The step signaled `Abort`.
    Aborted,
    /// The shutdown token fired before or between attempts.
    Shutdown,
}

/// Options for `continue_working`.
#[derive(Debug, Clone)]
pub struct ContinueOptions {
    /// Wait used for `ContinueWithDefaultInterval`.
    pub default_interval: Duration,
    /// Apply full jitter: draw the actual wait uniformly from 0..=interval.
    pub jitter: bool,
}

impl Default for ContinueOptions {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(5),
            jitter: false,
        }
    }
}

impl ContinueOptions {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default retry interval.
    #[must_use]
    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    /// Enables full jitter on the wait interval.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn wait_for(&self, interval: Duration) -> Duration {
        if !self.jitter || interval.is_zero() {
            return interval;
        }
        let millis = interval.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}

/// Runs `step` until it signals `Abort` or the shutdown token fires.
///
/// The step is attempted at least once unless shutdown is already
/// signaled. Waits between attempts honor the shutdown token: a signal
/// mid-wait returns promptly.
pub async fn continue_working<F, Fut>(
    shutdown: &ShutdownToken,
    opts: &ContinueOptions,
    mut step: F,
) -> ContinueResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = WorkOutcome>,
{
    loop {
        if shutdown.is_shutdown() {
            return ContinueResult::Shutdown;
        }
        let interval = match step().await {
            WorkOutcome::Abort => return ContinueResult::Aborted,
            WorkOutcome::ContinueWithDefaultInterval => opts.default_interval,
            WorkOutcome::ContinueWithCustomInterval(interval) => interval,
        };
        tokio::select! {
            () = sleep(opts.wait_for(interval)) => {}
            () = shutdown.wait() => return ContinueResult::Shutdown,
        }
    }
}
