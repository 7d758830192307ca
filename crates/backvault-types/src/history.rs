//! History log types.
//!
//! The history of an instance is an append-only sequence of events with
//! strictly increasing sequence numbers starting at 1. It is the only
//! persisted state of an orchestration; everything else is a projection.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::{
    ActivityError, ActivityInvocation, ActivityKind, ActivityStatus, FileBackupTask,
};
use crate::outcome::OrchestrationFailure;

/// One durable record in an instance's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl HistoryEvent {
    pub fn new(seq: u64, kind: EventKind) -> Self {
        Self {
            seq,
            recorded_at: Utc::now(),
            kind,
        }
    }
}

/// What happened at a given sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// First event of every instance.
    Started {
        orchestration: String,
        input: serde_json::Value,
    },

    /// The orchestration requested an activity. This event's own sequence
    /// number is the activity's correlation id.
    ActivityScheduled {
        kind: ActivityKind,
        input: serde_json::Value,
    },

    ActivityCompleted {
        scheduled_seq: u64,
        output: serde_json::Value,
        attempts: u32,
    },

    ActivityFailed {
        scheduled_seq: u64,
        error: ActivityError,
        attempts: u32,
    },

    Completed {
        output: serde_json::Value,
    },

    Failed {
        failure: OrchestrationFailure,
    },
}

impl EventKind {
    /// Short snake_case name, matching the serde tag.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Started { .. } => "started",
            EventKind::ActivityScheduled { .. } => "activity_scheduled",
            EventKind::ActivityCompleted { .. } => "activity_completed",
            EventKind::ActivityFailed { .. } => "activity_failed",
            EventKind::Completed { .. } => "completed",
            EventKind::Failed { .. } => "failed",
        }
    }

    /// Whether this event ends the instance.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Completed { .. } | EventKind::Failed { .. })
    }

    /// For activity completions and failures, the seq of the schedule they resolve.
    pub fn resolves(&self) -> Option<u64> {
        match self {
            EventKind::ActivityCompleted { scheduled_seq, .. }
            | EventKind::ActivityFailed { scheduled_seq, .. } => Some(*scheduled_seq),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// Rebuild the activity invocations of an instance from its history.
///
/// Returned in schedule order. Events resolving unknown schedules are ignored;
/// replay is where corrupt histories get rejected.
pub fn project_invocations(history: &[HistoryEvent]) -> Vec<ActivityInvocation> {
    let mut by_seq: BTreeMap<u64, ActivityInvocation> = BTreeMap::new();

    for event in history {
        match &event.kind {
            EventKind::ActivityScheduled { kind, input } => {
                by_seq.insert(
                    event.seq,
                    ActivityInvocation {
                        seq: event.seq,
                        kind: *kind,
                        input: input.clone(),
                        status: ActivityStatus::Scheduled,
                        output: None,
                        error: None,
                        attempts: 0,
                    },
                );
            }
            EventKind::ActivityCompleted {
                scheduled_seq,
                output,
                attempts,
            } => {
                if let Some(inv) = by_seq.get_mut(scheduled_seq) {
                    inv.status = ActivityStatus::Completed;
                    inv.output = Some(output.clone());
                    inv.attempts = *attempts;
                }
            }
            EventKind::ActivityFailed {
                scheduled_seq,
                error,
                attempts,
            } => {
                if let Some(inv) = by_seq.get_mut(scheduled_seq) {
                    inv.status = ActivityStatus::Failed;
                    inv.error = Some(error.clone());
                    inv.attempts = *attempts;
                }
            }
            _ => {}
        }
    }

    by_seq.into_values().collect()
}

/// Per-file backup view of a history, in schedule (= discovery) order.
///
/// `derive_path` maps a source path to its backup path; it is passed in so
/// this crate stays free of path logic.
pub fn project_backup_tasks(
    history: &[HistoryEvent],
    derive_path: impl Fn(&str) -> String,
) -> Vec<FileBackupTask> {
    project_invocations(history)
        .into_iter()
        .filter(|inv| inv.kind == ActivityKind::Backup)
        .map(|inv| {
            let source_path = inv.input.as_str().unwrap_or_default().to_string();
            FileBackupTask {
                backup_path: derive_path(&source_path),
                source_path,
                bytes: inv.output.as_ref().and_then(|v| v.as_u64()),
                status: inv.status,
                error: inv.error.map(|e| e.to_string()),
            }
        })
        .collect()
}
