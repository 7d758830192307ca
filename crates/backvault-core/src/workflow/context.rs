//! Orchestration context: the replay-aware activity scheduler handed to
//! orchestration code.
//!
//! Every schedule call is matched, in order, against the `ActivityScheduled`
//! events already in history. A match reuses the recorded sequence number so
//! its handle can resolve from the recorded outcome; a call past the end of
//! the recorded schedules is a new decision and gets the next free sequence
//! number. A mismatch is remembered as a determinism violation and reported
//! by the driver once the turn is over.
//!
//! The context is single-threaded (`Rc<RefCell<_>>`): a turn is one
//! synchronous poll, and the orchestration future never leaves the driver.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use backvault_types::activity::{ActivityError, ActivityKind};
use backvault_types::history::{EventKind, HistoryEvent};
use backvault_types::outcome::DeterminismViolation;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A schedule decision, recorded or new.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledActivity {
    pub seq: u64,
    pub kind: ActivityKind,
    pub input: Value,
}

/// Replay state reconstructed from one history prefix.
#[derive(Debug)]
pub(crate) struct ReplayState {
    pub(crate) orchestration: String,
    pub(crate) input: Value,
    /// Recorded `ActivityScheduled` events in sequence order.
    pub(crate) recorded: Vec<ScheduledActivity>,
    outcomes: HashMap<u64, Result<Value, ActivityError>>,
    /// Number of schedule calls issued so far in this turn.
    pub(crate) cursor: usize,
    next_seq: u64,
    pub(crate) new_schedules: Vec<ScheduledActivity>,
    pub(crate) violation: Option<DeterminismViolation>,
}

impl ReplayState {
    /// Validate `history` and index it for replay.
    ///
    /// Rejects histories that do not begin with `Started` at seq 1, have
    /// gaps or duplicates, resolve unknown or already-resolved schedules, or
    /// contain events after a terminal one.
    pub(crate) fn from_history(history: &[HistoryEvent]) -> Result<Self, DeterminismViolation> {
        let corrupt = |reason: String| DeterminismViolation::CorruptHistory { reason };

        let Some(first) = history.first() else {
            return Err(corrupt("history is empty".into()));
        };
        let (orchestration, input) = match &first.kind {
            EventKind::Started {
                orchestration,
                input,
            } if first.seq == 1 => (orchestration.clone(), input.clone()),
            _ => {
                return Err(corrupt(format!(
                    "expected started at seq 1, found {} at seq {}",
                    first.kind.name(),
                    first.seq
                )));
            }
        };

        let mut recorded = Vec::new();
        let mut outcomes = HashMap::new();
        let mut expected_seq = 1;

        for (i, event) in history.iter().enumerate() {
            if event.seq != expected_seq {
                return Err(corrupt(format!(
                    "expected seq {expected_seq}, found {}",
                    event.seq
                )));
            }
            expected_seq += 1;

            if event.kind.is_terminal() && i + 1 != history.len() {
                return Err(corrupt(format!(
                    "{} at seq {} is followed by more events",
                    event.kind.name(),
                    event.seq
                )));
            }

            match &event.kind {
                EventKind::Started { .. } if i > 0 => {
                    return Err(corrupt(format!("second started event at seq {}", event.seq)));
                }
                EventKind::ActivityScheduled { kind, input } => {
                    recorded.push(ScheduledActivity {
                        seq: event.seq,
                        kind: *kind,
                        input: input.clone(),
                    });
                }
                EventKind::ActivityCompleted {
                    scheduled_seq,
                    output,
                    ..
                } => {
                    Self::resolve(&recorded, &mut outcomes, event.seq, *scheduled_seq, Ok(output.clone()))?;
                }
                EventKind::ActivityFailed {
                    scheduled_seq,
                    error,
                    ..
                } => {
                    Self::resolve(&recorded, &mut outcomes, event.seq, *scheduled_seq, Err(error.clone()))?;
                }
                _ => {}
            }
        }

        Ok(Self {
            orchestration,
            input,
            recorded,
            outcomes,
            cursor: 0,
            next_seq: expected_seq,
            new_schedules: Vec::new(),
            violation: None,
        })
    }

    fn resolve(
        recorded: &[ScheduledActivity],
        outcomes: &mut HashMap<u64, Result<Value, ActivityError>>,
        seq: u64,
        scheduled_seq: u64,
        outcome: Result<Value, ActivityError>,
    ) -> Result<(), DeterminismViolation> {
        if !recorded.iter().any(|s| s.seq == scheduled_seq) {
            return Err(DeterminismViolation::CorruptHistory {
                reason: format!("event at seq {seq} resolves unknown schedule {scheduled_seq}"),
            });
        }
        if outcomes.insert(scheduled_seq, outcome).is_some() {
            return Err(DeterminismViolation::CorruptHistory {
                reason: format!("schedule {scheduled_seq} resolved twice (again at seq {seq})"),
            });
        }
        Ok(())
    }

    fn schedule(&mut self, kind: ActivityKind, input: Value) -> u64 {
        let index = self.cursor;
        self.cursor += 1;

        if let Some(recorded) = self.recorded.get(index) {
            if (recorded.kind != kind || recorded.input != input) && self.violation.is_none() {
                self.violation = Some(DeterminismViolation::ScheduleMismatch {
                    seq: recorded.seq,
                    expected_kind: recorded.kind,
                    expected_input: recorded.input.clone(),
                    actual_kind: kind,
                    actual_input: input,
                });
            }
            return recorded.seq;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.new_schedules.push(ScheduledActivity { seq, kind, input });
        seq
    }
}

// ---------------------------------------------------------------------------
// OrchestrationContext
// ---------------------------------------------------------------------------

/// Handle through which orchestration code schedules activities.
#[derive(Clone)]
pub struct OrchestrationContext {
    state: Rc<RefCell<ReplayState>>,
}

impl OrchestrationContext {
    pub(crate) fn new(state: Rc<RefCell<ReplayState>>) -> Self {
        Self { state }
    }

    /// Schedule an activity and get a handle to its eventual output.
    ///
    /// Calls must happen in the same order on every replay.
    pub fn call<T: DeserializeOwned>(&self, kind: ActivityKind, input: Value) -> ActivityHandle<T> {
        let seq = self.state.borrow_mut().schedule(kind, input);
        ActivityHandle {
            seq,
            state: Rc::clone(&self.state),
            _output: PhantomData,
        }
    }

    /// Schedule a discovery of every file under `root`.
    pub fn discover(&self, root: &str) -> ActivityHandle<Vec<String>> {
        self.call(ActivityKind::Discovery, Value::from(root))
    }

    /// Schedule a backup of one file.
    pub fn back_up(&self, path: &str) -> ActivityHandle<u64> {
        self.call(ActivityKind::Backup, Value::from(path))
    }

    /// Whether the next schedule call will be matched against history.
    pub fn is_replaying(&self) -> bool {
        let state = self.state.borrow();
        state.cursor < state.recorded.len()
    }
}

/// Future resolving to a scheduled activity's outcome.
///
/// Pending until the activity's terminal event is in history.
pub struct ActivityHandle<T> {
    seq: u64,
    state: Rc<RefCell<ReplayState>>,
    _output: PhantomData<fn() -> T>,
}

impl<T> ActivityHandle<T> {
    /// Correlation id of the scheduled activity.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl<T: DeserializeOwned> Future for ActivityHandle<T> {
    type Output = Result<T, ActivityError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let state = self.state.borrow();
        match state.outcomes.get(&self.seq) {
            Some(Ok(value)) => Poll::Ready(serde_json::from_value(value.clone()).map_err(|e| {
                ActivityError::other(format!("unexpected output for seq {}: {e}", self.seq))
            })),
            Some(Err(error)) => Poll::Ready(Err(error.clone())),
            None => Poll::Pending,
        }
    }
}
