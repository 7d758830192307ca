//! Activity domain types.
//!
//! An activity is an externally executed unit of work (directory discovery or
//! a single file backup) that an orchestration schedules and awaits. Failures
//! are values here, never panics: the orchestration receives them as the
//! activity's terminal state.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ActivityKind
// ---------------------------------------------------------------------------

/// The kind of activity an orchestration can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Recursively enumerate files under a root directory.
    Discovery,
    /// Copy one file to its derived backup path.
    Backup,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityKind::Discovery => write!(f, "discovery"),
            ActivityKind::Backup => write!(f, "backup"),
        }
    }
}

/// Lifecycle state of a scheduled activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Scheduled,
    Completed,
    Failed,
}

impl ActivityStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActivityStatus::Scheduled)
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityStatus::Scheduled => write!(f, "scheduled"),
            ActivityStatus::Completed => write!(f, "completed"),
            ActivityStatus::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// ActivityError
// ---------------------------------------------------------------------------

/// Classification of an activity failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityErrorKind {
    NotFound,
    PermissionDenied,
    /// The dispatcher gave up waiting for the activity.
    Timeout,
    Other,
}

impl ActivityErrorKind {
    /// Whether the dispatcher may re-run an activity that failed this way.
    ///
    /// A missing file or a permission problem will not fix itself between
    /// attempts; timeouts and unclassified I/O errors might.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActivityErrorKind::Timeout | ActivityErrorKind::Other)
    }
}

impl fmt::Display for ActivityErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityErrorKind::NotFound => write!(f, "not found"),
            ActivityErrorKind::PermissionDenied => write!(f, "permission denied"),
            ActivityErrorKind::Timeout => write!(f, "timed out"),
            ActivityErrorKind::Other => write!(f, "I/O error"),
        }
    }
}

/// A captured activity failure: what kind of error, and its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ActivityError {
    pub kind: ActivityErrorKind,
    pub message: String,
}

impl ActivityError {
    pub fn new(kind: ActivityErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ActivityErrorKind::Other, message)
    }

    /// Failure recorded when an activity exceeds the dispatcher's timeout.
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ActivityErrorKind::Timeout,
            format!("activity did not finish within {after:?}"),
        )
    }
}

impl From<std::io::Error> for ActivityError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ActivityErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ActivityErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut => ActivityErrorKind::Timeout,
            _ => ActivityErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// One scheduled activity as reconstructed from history.
///
/// Never stored on its own: see [`crate::history::project_invocations`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInvocation {
    /// Sequence number of the `ActivityScheduled` event (correlation id).
    pub seq: u64,
    pub kind: ActivityKind,
    pub input: serde_json::Value,
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActivityError>,
    /// Attempts made by the dispatcher (0 while still scheduled).
    pub attempts: u32,
}

/// Per-file view of a backup activity, used for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBackupTask {
    pub source_path: String,
    pub backup_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_kinds_map_to_activity_error_kinds() {
        let err: ActivityError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file").into();
        assert_eq!(err.kind, ActivityErrorKind::NotFound);
        assert!(err.message.contains("no such file"));

        let err: ActivityError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.kind, ActivityErrorKind::PermissionDenied);

        let err: ActivityError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind, ActivityErrorKind::Other);
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(ActivityErrorKind::Timeout.is_retryable());
        assert!(ActivityErrorKind::Other.is_retryable());
        assert!(!ActivityErrorKind::NotFound.is_retryable());
        assert!(!ActivityErrorKind::PermissionDenied.is_retryable());
    }

    #[test]
    fn activity_error_display() {
        let err = ActivityError::timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "timed out: activity did not finish within 30s");
    }

    #[test]
    fn activity_kind_serde() {
        let json = serde_json::to_string(&ActivityKind::Discovery).unwrap();
        assert_eq!(json, "\"discovery\"");
        let kind: ActivityKind = serde_json::from_str("\"backup\"").unwrap();
        assert_eq!(kind, ActivityKind::Backup);
    }

    #[test]
    fn scheduled_is_the_only_non_terminal_status() {
        assert!(!ActivityStatus::Scheduled.is_terminal());
        assert!(ActivityStatus::Completed.is_terminal());
        assert!(ActivityStatus::Failed.is_terminal());
    }
}
