//! Orchestration failures and terminal outcomes.
//!
//! Three user-visible outcomes exist: success with a result, an aggregate
//! failure naming every failed item, and a fatal orchestration error.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity::{ActivityError, ActivityKind};

/// One failed item of a fan-out batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    /// What the item was (for backups, the source file path).
    pub label: String,
    pub message: String,
}

/// At least one activity of a fan-out batch failed.
///
/// `failures` is ordered by the batch's input order, not by completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateFailure {
    pub failures: Vec<FailedItem>,
    /// Size of the batch the failures came from.
    pub attempted: usize,
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} activities failed",
            self.failures.len(),
            self.attempted
        )?;
        for (i, item) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{} ({})", item.label, item.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateFailure {}

/// Replay produced decisions that differ from the recorded history, or the
/// history itself cannot be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeterminismViolation {
    #[error(
        "schedule mismatch at seq {seq}: history recorded {expected_kind}({expected_input}), \
         replay issued {actual_kind}({actual_input})"
    )]
    ScheduleMismatch {
        seq: u64,
        expected_kind: ActivityKind,
        expected_input: serde_json::Value,
        actual_kind: ActivityKind,
        actual_input: serde_json::Value,
    },

    #[error("history records an activity at seq {seq} that replay never scheduled")]
    MissingSchedule { seq: u64 },

    #[error("history was recorded for orchestration '{recorded}', replaying '{replaying}'")]
    OrchestrationMismatch { recorded: String, replaying: String },

    #[error("corrupt history: {reason}")]
    CorruptHistory { reason: String },
}

/// Why an orchestration instance ended in the Failed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum OrchestrationFailure {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// A single awaited activity failed (e.g. discovery).
    #[error("{kind} activity failed: {error}")]
    Activity {
        kind: ActivityKind,
        error: ActivityError,
    },

    #[error("{0}")]
    Aggregate(AggregateFailure),

    /// Every item succeeded but their sizes do not fit the result type.
    #[error("total of {items} results overflows a 64-bit byte count")]
    TotalOverflow { items: usize },

    #[error("determinism violation: {0}")]
    NonDeterministic(DeterminismViolation),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(label: &str, message: &str) -> FailedItem {
        FailedItem {
            label: label.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn aggregate_failure_display_lists_every_item() {
        let failure = AggregateFailure {
            failures: vec![item("/a/3.txt", "denied"), item("/a/5.txt", "gone")],
            attempted: 5,
        };
        assert_eq!(
            failure.to_string(),
            "2 of 5 activities failed: /a/3.txt (denied); /a/5.txt (gone)"
        );
    }

    #[test]
    fn orchestration_failure_serde_is_tagged() {
        let failure = OrchestrationFailure::InvalidInput {
            reason: "root path is empty".to_string(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["type"], "invalid_input");
        let back: OrchestrationFailure = serde_json::from_value(json).unwrap();
        assert_eq!(back, failure);
    }

    #[test]
    fn aggregate_variant_survives_serde() {
        let failure = OrchestrationFailure::Aggregate(AggregateFailure {
            failures: vec![item("/x", "boom")],
            attempted: 1,
        });
        let json = serde_json::to_string(&failure).unwrap();
        let back: OrchestrationFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, failure);
    }

    #[test]
    fn violation_display_names_seq() {
        let v = DeterminismViolation::MissingSchedule { seq: 7 };
        assert!(v.to_string().contains("seq 7"));
    }
}
