//! Orchestration driver: one deterministic replay turn over a history.
//!
//! A turn re-runs the orchestration from the start against the current
//! history and polls it exactly once. Recorded activity outcomes resolve
//! immediately; anything not yet recorded leaves the orchestration pending,
//! which ends the turn. The driver never performs I/O and never mutates the
//! history: it reports the new schedule decisions and the orchestration's
//! status, and the engine persists them.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use backvault_types::history::HistoryEvent;
use backvault_types::outcome::{DeterminismViolation, OrchestrationFailure};
use futures_util::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::context::{OrchestrationContext, ReplayState, ScheduledActivity};

/// Deterministic orchestration logic.
///
/// `run` must derive every decision from its input and from activity
/// outcomes: no clocks, randomness, I/O or shared state. All side effects go
/// through [`OrchestrationContext`].
pub trait Orchestration: Send + Sync + 'static {
    type Input: Serialize + DeserializeOwned;
    type Output: Into<Value>;

    /// Stable name recorded in the `Started` event.
    fn name(&self) -> &'static str;

    fn run(
        &self,
        ctx: OrchestrationContext,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Output, OrchestrationFailure>>;
}

/// Where the orchestration stands after a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnStatus {
    /// Waiting on activities that have no terminal event yet.
    Suspended,
    Completed(Value),
    Failed(OrchestrationFailure),
}

/// Result of one replay turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// Schedule decisions not yet in history, in issue order.
    pub scheduled: Vec<ScheduledActivity>,
    pub status: TurnStatus,
}

/// Replay `orchestration` over `history` once.
///
/// Returns a violation if the history is corrupt, was recorded for another
/// orchestration, or the replay issued schedule calls that disagree with the
/// recorded ones (different order, kind or input, or fewer calls).
pub fn run_turn<O: Orchestration>(
    orchestration: &O,
    history: &[HistoryEvent],
) -> Result<Turn, DeterminismViolation> {
    let replay = ReplayState::from_history(history)?;
    if replay.orchestration != orchestration.name() {
        return Err(DeterminismViolation::OrchestrationMismatch {
            recorded: replay.orchestration,
            replaying: orchestration.name().to_string(),
        });
    }

    let input = replay.input.clone();
    let state = Rc::new(RefCell::new(replay));

    let polled = match serde_json::from_value::<O::Input>(input) {
        Ok(input) => {
            let ctx = OrchestrationContext::new(Rc::clone(&state));
            orchestration.run(ctx, input).now_or_never()
        }
        Err(e) => Some(Err(OrchestrationFailure::InvalidInput {
            reason: format!("cannot decode input: {e}"),
        })),
    };

    let mut state = state.borrow_mut();
    if let Some(violation) = state.violation.take() {
        return Err(violation);
    }
    if let Some(unreplayed) = state.recorded.get(state.cursor) {
        return Err(DeterminismViolation::MissingSchedule {
            seq: unreplayed.seq,
        });
    }

    let status = match polled {
        None => TurnStatus::Suspended,
        Some(Ok(output)) => TurnStatus::Completed(output.into()),
        Some(Err(failure)) => TurnStatus::Failed(failure),
    };

    Ok(Turn {
        scheduled: std::mem::take(&mut state.new_schedules),
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use backvault_types::activity::ActivityKind;
    use backvault_types::history::EventKind;
    use serde_json::json;

    /// Doubles a number through one activity.
    struct Doubler;

    impl Orchestration for Doubler {
        type Input = u64;
        type Output = u64;

        fn name(&self) -> &'static str {
            "doubler"
        }

        async fn run(
            &self,
            ctx: OrchestrationContext,
            input: u64,
        ) -> Result<u64, OrchestrationFailure> {
            let doubled: u64 = ctx
                .call(ActivityKind::Backup, json!(input.to_string()))
                .await
                .map_err(|error| OrchestrationFailure::Activity {
                    kind: ActivityKind::Backup,
                    error,
                })?;
            Ok(doubled)
        }
    }

    fn started(name: &str, input: Value) -> HistoryEvent {
        HistoryEvent::new(
            1,
            EventKind::Started {
                orchestration: name.into(),
                input,
            },
        )
    }

    #[test]
    fn first_turn_schedules_and_suspends() {
        let history = vec![started("doubler", json!(21))];
        let turn = run_turn(&Doubler, &history).unwrap();

        assert_eq!(turn.status, TurnStatus::Suspended);
        assert_eq!(turn.scheduled.len(), 1);
        assert_eq!(turn.scheduled[0].seq, 2);
        assert_eq!(turn.scheduled[0].input, json!("21"));
    }

    #[test]
    fn completed_history_yields_result_without_new_schedules() {
        let history = vec![
            started("doubler", json!(21)),
            HistoryEvent::new(
                2,
                EventKind::ActivityScheduled {
                    kind: ActivityKind::Backup,
                    input: json!("21"),
                },
            ),
            HistoryEvent::new(
                3,
                EventKind::ActivityCompleted {
                    scheduled_seq: 2,
                    output: json!(42),
                    attempts: 1,
                },
            ),
        ];

        let first = run_turn(&Doubler, &history).unwrap();
        let second = run_turn(&Doubler, &history).unwrap();
        assert_eq!(first, second);
        assert!(first.scheduled.is_empty());
        assert_eq!(first.status, TurnStatus::Completed(json!(42)));
    }

    #[test]
    fn undecodable_input_fails_the_instance() {
        let history = vec![started("doubler", json!("not a number"))];
        let turn = run_turn(&Doubler, &history).unwrap();
        assert!(matches!(
            turn.status,
            TurnStatus::Failed(OrchestrationFailure::InvalidInput { .. })
        ));
    }

    #[test]
    fn other_orchestration_history_is_rejected() {
        let history = vec![started("file_backup", json!("/data"))];
        let err = run_turn(&Doubler, &history).unwrap_err();
        assert!(matches!(
            err,
            DeterminismViolation::OrchestrationMismatch { .. }
        ));
    }

    #[test]
    fn schedule_never_reissued_is_a_violation() {
        // Never schedules anything, yet history says it did.
        struct Idle;
        impl Orchestration for Idle {
            type Input = u64;
            type Output = u64;
            fn name(&self) -> &'static str {
                "idle"
            }
            async fn run(
                &self,
                _ctx: OrchestrationContext,
                _input: u64,
            ) -> Result<u64, OrchestrationFailure> {
                Ok(0)
            }
        }

        let history = vec![
            started("idle", json!(0)),
            HistoryEvent::new(
                2,
                EventKind::ActivityScheduled {
                    kind: ActivityKind::Backup,
                    input: json!("0"),
                },
            ),
        ];
        let err = run_turn(&Idle, &history).unwrap_err();
        assert_eq!(err, DeterminismViolation::MissingSchedule { seq: 2 });
    }
}
