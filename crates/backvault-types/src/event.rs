//! Event types for the Backvault engine event bus.
//!
//! `EngineEvent` is broadcast while an instance is being driven. These are
//! notifications for observers (progress bars, logs), not history: nothing
//! here is persisted or replayed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::activity::ActivityKind;
use crate::instance::InstanceStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A new instance was created and its `Started` event appended.
    InstanceStarted { instance_id: Uuid, root_path: String },

    /// An unfinished instance was picked up again.
    InstanceResumed {
        instance_id: Uuid,
        /// Scheduled activities without a terminal event.
        pending: usize,
    },

    /// A replay turn scheduled a new batch of activities.
    ActivitiesScheduled {
        instance_id: Uuid,
        kind: ActivityKind,
        count: usize,
    },

    /// An activity reached a terminal state and it was appended.
    ActivityFinished {
        instance_id: Uuid,
        seq: u64,
        kind: ActivityKind,
        succeeded: bool,
        attempts: u32,
        duration_ms: u64,
    },

    /// The instance reached a terminal state.
    InstanceFinished {
        instance_id: Uuid,
        status: InstanceStatus,
    },
}

impl EngineEvent {
    pub fn instance_id(&self) -> Uuid {
        match self {
            EngineEvent::InstanceStarted { instance_id, .. }
            | EngineEvent::InstanceResumed { instance_id, .. }
            | EngineEvent::ActivitiesScheduled { instance_id, .. }
            | EngineEvent::ActivityFinished { instance_id, .. }
            | EngineEvent::InstanceFinished { instance_id, .. } => *instance_id,
        }
    }
}
