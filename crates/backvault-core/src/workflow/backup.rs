//! The fan-out/fan-in file backup orchestration.
//!
//! discovery(root) -> one backup per discovered file, all in flight at once
//! -> wait for every backup -> sum bytes in discovery order.

use std::future::Future;

use backvault_types::activity::ActivityKind;
use backvault_types::outcome::OrchestrationFailure;

use super::context::OrchestrationContext;
use super::driver::Orchestration;
use super::fan_in::{collect_all, gather};

/// Name recorded in the `Started` event of backup instances.
pub const FILE_BACKUP: &str = "file_backup";

/// Backs up every file under a root directory and returns the total bytes copied.
///
/// Input is the root path as resolved by the trigger boundary; it is trimmed
/// here, and a blank root fails the instance with `InvalidInput`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileBackupOrchestration;

impl Orchestration for FileBackupOrchestration {
    type Input = String;
    type Output = u64;

    fn name(&self) -> &'static str {
        FILE_BACKUP
    }

    fn run(
        &self,
        ctx: OrchestrationContext,
        root: String,
    ) -> impl Future<Output = Result<u64, OrchestrationFailure>> {
        async move {
            let root = root.trim();
            if root.is_empty() {
                return Err(OrchestrationFailure::InvalidInput {
                    reason: "root path is empty".to_string(),
                });
            }

            let files = ctx
                .discover(root)
                .await
                .map_err(|error| OrchestrationFailure::Activity {
                    kind: ActivityKind::Discovery,
                    error,
                })?;

            let backups: Vec<_> = files.iter().map(|file| ctx.back_up(file)).collect();
            let outcomes = gather(backups).await;

            let sizes = collect_all(&files, outcomes).map_err(OrchestrationFailure::Aggregate)?;
            sizes
                .into_iter()
                .try_fold(0u64, u64::checked_add)
                .ok_or(OrchestrationFailure::TotalOverflow { items: files.len() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::driver::{TurnStatus, run_turn};
    use backvault_types::activity::{ActivityError, ActivityErrorKind};
    use backvault_types::history::{EventKind, HistoryEvent};
    use serde_json::{Value, json};

    /// Builds histories the way the engine would, one event at a time.
    struct HistoryBuilder {
        events: Vec<HistoryEvent>,
    }

    impl HistoryBuilder {
        fn started(root: &str) -> Self {
            Self {
                events: vec![HistoryEvent::new(
                    1,
                    EventKind::Started {
                        orchestration: FILE_BACKUP.into(),
                        input: json!(root),
                    },
                )],
            }
        }

        fn push(&mut self, kind: EventKind) -> u64 {
            let seq = self.events.len() as u64 + 1;
            self.events.push(HistoryEvent::new(seq, kind));
            seq
        }

        /// Run a turn and append its schedules.
        fn turn(&mut self) -> (Vec<u64>, TurnStatus) {
            let turn = run_turn(&FileBackupOrchestration, &self.events).unwrap();
            let mut seqs = Vec::new();
            for s in turn.scheduled {
                let seq = self.push(EventKind::ActivityScheduled {
                    kind: s.kind,
                    input: s.input,
                });
                assert_eq!(seq, s.seq);
                seqs.push(seq);
            }
            (seqs, turn.status)
        }

        fn complete(&mut self, scheduled_seq: u64, output: Value) {
            self.push(EventKind::ActivityCompleted {
                scheduled_seq,
                output,
                attempts: 1,
            });
        }

        fn fail(&mut self, scheduled_seq: u64, message: &str) {
            self.push(EventKind::ActivityFailed {
                scheduled_seq,
                error: ActivityError::new(ActivityErrorKind::PermissionDenied, message),
                attempts: 1,
            });
        }
    }

    fn paths(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("/data/{i}.txt")).collect()
    }

    #[test]
    fn blank_root_is_invalid_input() {
        let mut h = HistoryBuilder::started("   ");
        let (scheduled, status) = h.turn();
        assert!(scheduled.is_empty());
        assert!(matches!(
            status,
            TurnStatus::Failed(OrchestrationFailure::InvalidInput { .. })
        ));
    }

    #[test]
    fn root_is_trimmed_before_discovery() {
        let h = HistoryBuilder::started("  /data \n");
        let turn = run_turn(&FileBackupOrchestration, &h.events).unwrap();
        assert_eq!(turn.scheduled[0].kind, ActivityKind::Discovery);
        assert_eq!(turn.scheduled[0].input, json!("/data"));
    }

    #[test]
    fn empty_directory_completes_with_zero() {
        let mut h = HistoryBuilder::started("/empty");
        let (discovery, _) = h.turn();
        h.complete(discovery[0], json!([]));

        let (scheduled, status) = h.turn();
        assert!(scheduled.is_empty());
        assert_eq!(status, TurnStatus::Completed(json!(0)));
    }

    #[test]
    fn fan_out_assigns_distinct_ordered_seqs() {
        let mut h = HistoryBuilder::started("/data");
        let (discovery, _) = h.turn();
        h.complete(discovery[0], json!(paths(4)));

        let (backups, status) = h.turn();
        assert_eq!(status, TurnStatus::Suspended);
        assert_eq!(backups, vec![4, 5, 6, 7]);
    }

    #[test]
    fn total_is_independent_of_completion_order() {
        let sizes = [10u64, 20, 30, 40];
        let mut totals = Vec::new();

        for order in [[0, 1, 2, 3], [3, 1, 0, 2], [2, 3, 1, 0]] {
            let mut h = HistoryBuilder::started("/data");
            let (discovery, _) = h.turn();
            h.complete(discovery[0], json!(paths(4)));
            let (backups, _) = h.turn();

            let mut last = TurnStatus::Suspended;
            for i in order {
                h.complete(backups[i], json!(sizes[i]));
                let (more, status) = h.turn();
                assert!(more.is_empty());
                last = status;
            }
            totals.push(last);
        }

        for total in totals {
            assert_eq!(total, TurnStatus::Completed(json!(100)));
        }
    }

    #[test]
    fn no_partial_result_while_any_backup_is_pending() {
        let mut h = HistoryBuilder::started("/data");
        let (discovery, _) = h.turn();
        h.complete(discovery[0], json!(paths(3)));
        let (backups, _) = h.turn();

        h.complete(backups[0], json!(1));
        h.fail(backups[1], "denied");
        let (_, status) = h.turn();
        assert_eq!(status, TurnStatus::Suspended);
    }

    #[test]
    fn third_of_five_failing_names_only_that_file() {
        let mut h = HistoryBuilder::started("/data");
        let (discovery, _) = h.turn();
        h.complete(discovery[0], json!(paths(5)));
        let (backups, _) = h.turn();

        for (i, seq) in backups.iter().enumerate().rev() {
            if i == 2 {
                h.fail(*seq, "access denied");
            } else {
                h.complete(*seq, json!(100));
            }
        }

        let (_, status) = h.turn();
        let failure = match status {
            TurnStatus::Failed(OrchestrationFailure::Aggregate(failure)) => failure,
            other => panic!("expected aggregate failure, got {other:?}"),
        };
        assert_eq!(failure.attempted, 5);
        assert_eq!(failure.failures.len(), 1);
        assert_eq!(failure.failures[0].label, "/data/3.txt");
        assert!(failure.failures[0].message.contains("access denied"));
    }

    #[test]
    fn total_overflow_fails_instead_of_clamping() {
        let mut h = HistoryBuilder::started("/data");
        let (discovery, _) = h.turn();
        h.complete(discovery[0], json!(paths(2)));
        let (backups, _) = h.turn();
        h.complete(backups[0], json!(u64::MAX));
        h.complete(backups[1], json!(1));

        let (_, status) = h.turn();
        assert_eq!(
            status,
            TurnStatus::Failed(OrchestrationFailure::TotalOverflow { items: 2 })
        );
    }

    #[test]
    fn discovery_failure_fails_the_instance() {
        let mut h = HistoryBuilder::started("/missing");
        let (discovery, _) = h.turn();
        h.fail(discovery[0], "no such directory");

        let (scheduled, status) = h.turn();
        assert!(scheduled.is_empty());
        assert!(matches!(
            status,
            TurnStatus::Failed(OrchestrationFailure::Activity {
                kind: ActivityKind::Discovery,
                ..
            })
        ));
    }

    #[test]
    fn replaying_a_finished_history_is_stable() {
        let mut h = HistoryBuilder::started("/data");
        let (discovery, _) = h.turn();
        h.complete(discovery[0], json!(paths(2)));
        let (backups, _) = h.turn();
        h.complete(backups[1], json!(5));
        h.complete(backups[0], json!(7));

        let first = run_turn(&FileBackupOrchestration, &h.events).unwrap();
        let second = run_turn(&FileBackupOrchestration, &h.events).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.status, TurnStatus::Completed(json!(12)));
    }

    #[test]
    fn altered_discovery_result_is_a_violation() {
        // History claims the fan-out was for files other than those discovered.
        let mut h = HistoryBuilder::started("/data");
        let (discovery, _) = h.turn();
        h.complete(discovery[0], json!(paths(2)));
        h.push(EventKind::ActivityScheduled {
            kind: ActivityKind::Backup,
            input: json!("/elsewhere/1.txt"),
        });

        let err = run_turn(&FileBackupOrchestration, &h.events).unwrap_err();
        assert!(matches!(
            err,
            backvault_types::outcome::DeterminismViolation::ScheduleMismatch { seq: 4, .. }
        ));
    }
}
