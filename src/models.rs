//! Run and RunSet data model.
//!
//! Statuses are closed enums partitioned into terminal and non-terminal
//! states. Only non-terminal runs are ever selected for polling or
//! cancellation; a terminal run never transitions again without external
//! intervention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of characters stored in `Run::error_messages`. Longer
/// messages are silently truncated, not rejected.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

// ============================================================================
// Run status
// ============================================================================

/// Status of a single workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Unknown,
    Queued,
    Initializing,
    Running,
    Paused,
    Complete,
    ExecutorError,
    SystemError,
    Canceled,
    Canceling,
}

/// Every status a run can hold while still in flight.
pub const NON_TERMINAL_RUN_STATUSES: &[RunStatus] = &[
    RunStatus::Unknown,
    RunStatus::Queued,
    RunStatus::Initializing,
    RunStatus::Running,
    RunStatus::Paused,
    RunStatus::Canceling,
];

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Queued => "QUEUED",
            Self::Initializing => "INITIALIZING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Complete => "COMPLETE",
            Self::ExecutorError => "EXECUTOR_ERROR",
            Self::SystemError => "SYSTEM_ERROR",
            Self::Canceled => "CANCELED",
            Self::Canceling => "CANCELING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNKNOWN" => Some(Self::Unknown),
            "QUEUED" => Some(Self::Queued),
            "INITIALIZING" => Some(Self::Initializing),
            "RUNNING" => Some(Self::Running),
            "PAUSED" => Some(Self::Paused),
            "COMPLETE" => Some(Self::Complete),
            "EXECUTOR_ERROR" => Some(Self::ExecutorError),
            "SYSTEM_ERROR" => Some(Self::SystemError),
            "CANCELED" => Some(Self::Canceled),
            "CANCELING" => Some(Self::Canceling),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::ExecutorError | Self::SystemError | Self::Canceled
        )
    }

    pub fn non_terminal(&self) -> bool {
        !self.is_terminal()
    }

    pub fn in_error_state(&self) -> bool {
        matches!(self, Self::ExecutorError | Self::SystemError)
    }

    /// Map a raw engine status string onto the local status set. Unrecognized
    /// statuses map to `Unknown` rather than failing the poll.
    pub fn from_engine_status(status: &str) -> Self {
        match status {
            "Submitted" => Self::Initializing,
            "Running" => Self::Running,
            "Aborting" => Self::Canceling,
            "Aborted" => Self::Canceled,
            "Failed" => Self::ExecutorError,
            "Succeeded" => Self::Complete,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Run set status
// ============================================================================

/// Aggregate status of a run set, derived from its member runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunSetStatus {
    Unknown,
    Queued,
    Running,
    Complete,
    Error,
    Canceled,
    Canceling,
}

impl RunSetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Canceled => "CANCELED",
            Self::Canceling => "CANCELING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNKNOWN" => Some(Self::Unknown),
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "COMPLETE" => Some(Self::Complete),
            "ERROR" => Some(Self::Error),
            "CANCELED" => Some(Self::Canceled),
            "CANCELING" => Some(Self::Canceling),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Canceled)
    }

    pub fn non_terminal(&self) -> bool {
        !self.is_terminal()
    }

    /// Derive the aggregate status from member-run status counts.
    ///
    /// The precedence is ordered: any Unknown run makes the set Unknown, then
    /// any canceling run, then any still-running family member, then any
    /// errored run, then any canceled run; a set with nothing left in those
    /// buckets is Complete.
    pub fn from_run_status_counts<S: std::hash::BuildHasher>(
        counts: &std::collections::HashMap<RunStatus, i64, S>,
    ) -> Self {
        const PRECEDENCE: &[(RunStatus, RunSetStatus)] = &[
            (RunStatus::Unknown, RunSetStatus::Unknown),
            (RunStatus::Canceling, RunSetStatus::Canceling),
            (RunStatus::Running, RunSetStatus::Running),
            (RunStatus::Queued, RunSetStatus::Running),
            (RunStatus::Paused, RunSetStatus::Running),
            (RunStatus::Initializing, RunSetStatus::Running),
            (RunStatus::SystemError, RunSetStatus::Error),
            (RunStatus::ExecutorError, RunSetStatus::Error),
            (RunStatus::Canceled, RunSetStatus::Canceled),
        ];

        for (run_status, set_status) in PRECEDENCE {
            if counts.get(run_status).copied().unwrap_or(0) != 0 {
                return *set_status;
            }
        }
        Self::Complete
    }
}

impl std::fmt::Display for RunSetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Run set
// ============================================================================

/// A batch of runs submitted together against one method version.
///
/// `run_count` and `error_count` are derived from the member runs and are
/// recomputed whenever the aggregate status is refreshed, never incremented
/// in place.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSet {
    pub run_set_id: Uuid,
    pub method_version_id: Uuid,
    pub name: String,
    pub description: String,
    pub is_template: bool,
    pub status: RunSetStatus,
    pub submission_timestamp: DateTime<Utc>,
    pub last_modified_timestamp: DateTime<Utc>,
    pub last_polled_timestamp: Option<DateTime<Utc>>,
    pub run_count: i32,
    pub error_count: i32,
    /// Serialized type-directed input parameter mappings; opaque to this core.
    pub input_definition: String,
    /// Serialized type-directed output parameter mappings; opaque to this core.
    pub output_definition: String,
    pub record_type: String,
    pub user_id: String,
    pub original_workspace_id: Option<Uuid>,
}

// ============================================================================
// Run
// ============================================================================

/// One execution of a method version against one input record.
///
/// Status transitions happen only through the completion handler;
/// `last_polled_timestamp` is bumped on every successful poll attempt whether
/// or not the status changed, and is `None` until the first poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub run_id: Uuid,
    /// Identifier assigned by the execution engine once submission succeeds.
    pub engine_id: Option<String>,
    pub run_set: RunSet,
    pub record_id: String,
    pub submission_timestamp: DateTime<Utc>,
    pub status: RunStatus,
    pub last_modified_timestamp: DateTime<Utc>,
    pub last_polled_timestamp: Option<DateTime<Utc>>,
    pub error_messages: Option<String>,
}

impl Run {
    pub fn run_set_id(&self) -> Uuid {
        self.run_set.run_set_id
    }

    /// Replace the stored error message, truncating to
    /// [`MAX_ERROR_MESSAGE_CHARS`].
    pub fn with_error_messages(mut self, message: &str) -> Self {
        self.error_messages = Some(truncate_error_message(message));
        self
    }
}

/// Truncate an error message to [`MAX_ERROR_MESSAGE_CHARS`] characters.
pub fn truncate_error_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_CHARS) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
