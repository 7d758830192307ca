//! Workflow instance types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Completed,
    Failed,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceStatus::Running)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Completed => write!(f, "completed"),
            InstanceStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(InstanceStatus::Running),
            "completed" => Ok(InstanceStatus::Completed),
            "failed" => Ok(InstanceStatus::Failed),
            other => Err(format!("unknown instance status: '{other}'")),
        }
    }
}

/// One execution of an orchestration.
///
/// Everything except the row metadata is derivable from the history log;
/// `status`, `replay_cursor` and `error` are kept here so listings do not
/// have to replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    /// Name of the orchestration this instance runs.
    pub orchestration: String,
    pub status: InstanceStatus,
    /// Resolved root path the instance was started with.
    pub root_path: String,
    /// Sequence number of the last history event applied.
    pub replay_cursor: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// A fresh instance with a time-sortable id and nothing applied yet.
    pub fn new(orchestration: impl Into<String>, root_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            orchestration: orchestration.into(),
            status: InstanceStatus::Running,
            root_path: root_path.into(),
            replay_cursor: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
