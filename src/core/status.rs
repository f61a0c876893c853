//! Pipeline and task status enums plus the fixed status reduction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a pipeline or one of its tasks.
///
/// Pipelines and tasks share one status space; a handful of variants only
/// ever appear on one of the two (e.g. `Analyzed` marks a task that exists
/// in the graph but has no durable row yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PipelineStatus {
    /// Parsed from the graph definition, no durable row written yet.
    Analyzed,
    /// Created in the store, not yet queued.
    Born,
    /// Paused before entering the queue.
    Paused,
    /// Marked for execution.
    Mark,
    /// Created by an external trigger.
    Created,
    /// Waiting in the execution queue.
    Queue,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Success,
    /// Execution failed.
    Failed,
    /// Execution exceeded its deadline.
    Timeout,
    /// Stopped by an explicit user cancellation.
    StopByUser,
    /// Skipped by the system (e.g. dependency failed, condition false).
    NoNeedBySystem,
    /// Resource creation failed before execution.
    CreateError,
    /// Execution could not be started.
    StartError,
    /// A store error ended execution.
    DbError,
    /// A generic execution error.
    Error,
    /// Connection to the executing agent was lost.
    LostConn,
    /// Cancelled by a remote collaborator.
    CancelByRemote,
    /// Status could not be determined.
    Unknown,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::Analyzed
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Analyzed => "Analyzed",
            Self::Born => "Born",
            Self::Paused => "Paused",
            Self::Mark => "Mark",
            Self::Created => "Created",
            Self::Queue => "Queue",
            Self::Running => "Running",
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Timeout => "Timeout",
            Self::StopByUser => "StopByUser",
            Self::NoNeedBySystem => "NoNeedBySystem",
            Self::CreateError => "CreateError",
            Self::StartError => "StartError",
            Self::DbError => "DBError",
            Self::Error => "Error",
            Self::LostConn => "LostConn",
            Self::CancelByRemote => "CancelByRemote",
            Self::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

impl PipelineStatus {
    /// Returns true if no further transitions are permitted from this status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }

    /// Returns true if the status is the successful terminal status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true for any failed terminal status.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed
                | Self::Timeout
                | Self::StopByUser
                | Self::NoNeedBySystem
                | Self::CreateError
                | Self::StartError
                | Self::DbError
                | Self::Error
                | Self::LostConn
                | Self::CancelByRemote
                | Self::Unknown
        )
    }

    /// Returns true once the pipeline has passed the queue checkpoint.
    ///
    /// `prepare_before_reconcile` skips the `Running` transition for these.
    #[must_use]
    pub fn is_after_queue(&self) -> bool {
        matches!(self, Self::Running) || self.is_terminal()
    }

    /// Returns true if a user cancellation is meaningful in this status.
    #[must_use]
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Queue | Self::Running)
    }

    /// Returns true for statuses a task may hold before its worker starts.
    #[must_use]
    pub fn is_not_started(&self) -> bool {
        matches!(
            self,
            Self::Analyzed | Self::Born | Self::Paused | Self::Mark | Self::Created | Self::Queue
        )
    }

    /// Returns true if the status counts toward "the task did not break the
    /// pipeline": success, or skipped by the system.
    #[must_use]
    pub fn is_success_like(&self) -> bool {
        matches!(self, Self::Success | Self::NoNeedBySystem)
    }
}

/// Reduces a set of task statuses to one pipeline status.
///
/// Priority order is fixed; event consumers depend on it:
/// 1. any non-terminal task keeps the pipeline `Running`
/// 2. user/remote cancellation wins over failure (`StopByUser`)
/// 3. `Failed`
/// 4. `Timeout`
/// 5. the first infrastructure error kind present, in the order
///    `CreateError`, `StartError`, `DbError`, `Error`, `LostConn`, `Unknown`
/// 6. all success-like tasks reduce to `Success`
///
/// An empty input reduces to `Success`; the aggregator layers the zero-row
/// override on top of that.
#[must_use]
pub fn reduce_task_statuses(statuses: &[PipelineStatus]) -> PipelineStatus {
    if statuses.iter().any(|s| !s.is_terminal()) {
        return PipelineStatus::Running;
    }
    if statuses
        .iter()
        .any(|s| matches!(s, PipelineStatus::StopByUser | PipelineStatus::CancelByRemote))
    {
        return PipelineStatus::StopByUser;
    }
    if statuses.contains(&PipelineStatus::Failed) {
        return PipelineStatus::Failed;
    }
    if statuses.contains(&PipelineStatus::Timeout) {
        return PipelineStatus::Timeout;
    }
    for error_kind in [
        PipelineStatus::CreateError,
        PipelineStatus::StartError,
        PipelineStatus::DbError,
        PipelineStatus::Error,
        PipelineStatus::LostConn,
        PipelineStatus::Unknown,
    ] {
        if statuses.contains(&error_kind) {
            return error_kind;
        }
    }
    PipelineStatus::Success
}

/// Returns true if every task in the slice has reached a terminal status.
#[must_use]
pub fn all_tasks_done(statuses: &[PipelineStatus]) -> bool {
    statuses.iter().all(PipelineStatus::is_terminal)
}
