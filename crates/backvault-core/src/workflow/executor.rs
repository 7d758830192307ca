//! Workflow engine: the host loop that drives orchestration instances.
//!
//! For one instance the engine alternates between replay and execution:
//! 1. Replay the orchestration over the recorded history (`run_turn`).
//! 2. Journal the turn's new `ActivityScheduled` events, then spawn each
//!    activity on a worker task via `tokio::JoinSet`, bounded by a semaphore
//!    and subject to a per-attempt timeout and the retry policy.
//! 3. Wait for activities to finish, journal their terminal events, and go
//!    back to 1.
//! 4. Once the orchestration returns, wait for anything still in flight,
//!    journal the terminal event and mark the instance finished.
//!
//! Nothing is acted on before it is journaled, so resuming after a crash
//! replays to the same point and re-dispatches only the activities whose
//! terminal event is missing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use backvault_types::activity::{ActivityError, ActivityErrorKind, ActivityKind, ActivityStatus};
use backvault_types::config::{EngineConfig, RetryConfig};
use backvault_types::event::EngineEvent;
use backvault_types::history::{EventKind, HistoryEvent, project_invocations};
use backvault_types::instance::InstanceStatus;
use backvault_types::outcome::{DeterminismViolation, OrchestrationFailure};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::activity::{ActivityExecutor, invoke};
use crate::event::EventBus;
use crate::repository::history::HistoryRepository;

use super::checkpoint::{HistoryJournal, JournalError};
use super::context::ScheduledActivity;
use super::driver::{Orchestration, TurnStatus, run_turn};
use super::retry::RetryHandler;

// ---------------------------------------------------------------------------
// DispatchPolicy
// ---------------------------------------------------------------------------

/// How the engine executes activities. Applies uniformly to every activity.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Limit for a single attempt.
    pub activity_timeout: Duration,
    /// Concurrent activity executions per instance.
    pub max_parallel: usize,
    pub retry: RetryConfig,
}

impl DispatchPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            activity_timeout: Duration::from_secs(config.activity_timeout_secs.max(1)),
            max_parallel: config.max_parallel_activities.max(1),
            retry: config.retry.clone(),
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Outcome of driving an instance to a terminal state.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub instance_id: Uuid,
    pub status: InstanceStatus,
    /// Orchestration result when `status` is `Completed`.
    pub output: Option<Value>,
    /// Failure when `status` is `Failed`.
    pub failure: Option<OrchestrationFailure>,
    /// Activities executed by this call (0 if the instance had already finished).
    pub activities_run: usize,
}

impl ExecutionResult {
    /// Build a result from a terminal history event; `None` for any other event.
    pub fn from_terminal(instance_id: Uuid, kind: &EventKind, activities_run: usize) -> Option<Self> {
        let (status, output, failure) = match kind {
            EventKind::Completed { output } => (InstanceStatus::Completed, Some(output.clone()), None),
            EventKind::Failed { failure } => (InstanceStatus::Failed, None, Some(failure.clone())),
            _ => return None,
        };
        Some(Self {
            instance_id,
            status,
            output,
            failure,
            activities_run,
        })
    }

    /// The output as a byte total, for orchestrations that produce one.
    pub fn total_bytes(&self) -> Option<u64> {
        self.output.as_ref().and_then(Value::as_u64)
    }
}

/// Terminal state of one dispatched activity, produced by its worker task.
#[derive(Debug)]
struct ActivityReport {
    seq: u64,
    kind: ActivityKind,
    outcome: Result<Value, ActivityError>,
    attempts: u32,
    elapsed: Duration,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Durable host for one orchestration type.
///
/// Generic over the storage backend, the activity implementation and the
/// orchestration. Many instances may be driven at once (see
/// [`WorkflowEngine::resume_unfinished`]); each instance is driven by at most
/// one call at a time.
pub struct WorkflowEngine<R: HistoryRepository, A: ActivityExecutor, O: Orchestration> {
    journal: HistoryJournal<R>,
    activities: Arc<A>,
    orchestration: O,
    policy: DispatchPolicy,
    event_bus: EventBus,
    /// Interrupt tokens for the instances currently being driven.
    active: DashMap<Uuid, CancellationToken>,
}

impl<R, A, O> WorkflowEngine<R, A, O>
where
    R: HistoryRepository,
    A: ActivityExecutor,
    O: Orchestration,
{
    pub fn new(
        orchestration: O,
        repo: R,
        activities: A,
        policy: DispatchPolicy,
        event_bus: EventBus,
    ) -> Self {
        Self {
            journal: HistoryJournal::new(repo),
            activities: Arc::new(activities),
            orchestration,
            policy,
            event_bus,
            active: DashMap::new(),
        }
    }

    pub fn journal(&self) -> &HistoryJournal<R> {
        &self.journal
    }

    pub fn activities(&self) -> &A {
        &self.activities
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Create a new instance for `input` and drive it to a terminal state.
    pub async fn start(&self, input: O::Input) -> Result<ExecutionResult, EngineError> {
        let input = serde_json::to_value(&input).map_err(|e| EngineError::Input(e.to_string()))?;
        let (instance, started) = self
            .journal
            .start_instance(self.orchestration.name(), input)
            .await?;

        tracing::info!(
            instance_id = %instance.id,
            orchestration = self.orchestration.name(),
            root_path = %instance.root_path,
            "instance started"
        );
        self.event_bus.publish(EngineEvent::InstanceStarted {
            instance_id: instance.id,
            root_path: instance.root_path.clone(),
        });

        self.drive(instance.id, vec![started]).await
    }

    /// Continue an instance from its recorded history.
    ///
    /// An instance that already finished is not re-driven; its recorded
    /// outcome is returned.
    pub async fn resume(&self, instance_id: Uuid) -> Result<ExecutionResult, EngineError> {
        let (instance, history) = self.journal.load(instance_id).await?;

        let finished = history.last().and_then(|last| {
            ExecutionResult::from_terminal(instance_id, &last.kind, 0).map(|result| (last, result))
        });
        if let Some((last, result)) = finished {
            self.journal.reconcile(&instance, last).await?;
            tracing::info!(instance_id = %instance_id, status = %result.status, "instance already finished");
            return Ok(result);
        }

        self.drive(instance_id, history).await
    }

    /// Resume every instance that has not reached a terminal state, concurrently.
    pub async fn resume_unfinished(
        &self,
    ) -> Result<Vec<(Uuid, Result<ExecutionResult, EngineError>)>, EngineError> {
        let unfinished = self.journal.unfinished().await?;
        tracing::info!(count = unfinished.len(), "resuming unfinished instances");

        let runs = unfinished
            .iter()
            .map(|instance| async move { (instance.id, self.resume(instance.id).await) });
        Ok(futures_util::future::join_all(runs).await)
    }

    /// Stop driving an instance. It stays `Running` and can be resumed later.
    ///
    /// Returns `false` if the instance is not being driven by this engine.
    pub fn interrupt(&self, instance_id: Uuid) -> bool {
        match self.active.get(&instance_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop driving every instance.
    pub fn interrupt_all(&self) {
        for entry in self.active.iter() {
            entry.value().cancel();
        }
    }

    async fn drive(
        &self,
        instance_id: Uuid,
        history: Vec<HistoryEvent>,
    ) -> Result<ExecutionResult, EngineError> {
        let token = CancellationToken::new();
        match self.active.entry(instance_id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyRunning(instance_id)),
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }

        let result = self.run_instance(instance_id, history, &token).await;
        self.active.remove(&instance_id);
        result
    }

    async fn run_instance(
        &self,
        instance_id: Uuid,
        mut history: Vec<HistoryEvent>,
        token: &CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        let semaphore = Arc::new(Semaphore::new(self.policy.max_parallel));
        let mut in_flight: JoinSet<ActivityReport> = JoinSet::new();
        let mut activities_run = 0;

        // Crash recovery: schedules journaled without a terminal event. They
        // are dispatched only after the first turn has accepted the history.
        let mut recovered = (history.len() > 1).then(|| unresolved_schedules(&history));

        loop {
            let turn = match run_turn(&self.orchestration, &history) {
                Ok(turn) => turn,
                Err(violation) => {
                    in_flight.shutdown().await;
                    return self.fail_non_deterministic(instance_id, &history, violation).await;
                }
            };

            if let Some(pending) = recovered.take() {
                tracing::info!(
                    instance_id = %instance_id,
                    cursor = history.len(),
                    pending = pending.len(),
                    "resuming instance"
                );
                self.event_bus.publish(EngineEvent::InstanceResumed {
                    instance_id,
                    pending: pending.len(),
                });
                for activity in pending {
                    self.dispatch(&mut in_flight, &semaphore, activity);
                    activities_run += 1;
                }
            }

            if !turn.scheduled.is_empty() {
                let events: Vec<HistoryEvent> = turn
                    .scheduled
                    .iter()
                    .map(|s| {
                        HistoryEvent::new(
                            s.seq,
                            EventKind::ActivityScheduled {
                                kind: s.kind,
                                input: s.input.clone(),
                            },
                        )
                    })
                    .collect();
                self.journal.append(instance_id, &events).await?;
                history.extend(events);
                self.announce_schedules(instance_id, &turn.scheduled);

                for activity in turn.scheduled {
                    self.dispatch(&mut in_flight, &semaphore, activity);
                    activities_run += 1;
                }
            }

            let terminal = match turn.status {
                TurnStatus::Suspended => {
                    if in_flight.is_empty() {
                        return Err(EngineError::Stalled(instance_id));
                    }

                    let first = tokio::select! {
                        _ = token.cancelled() => {
                            in_flight.shutdown().await;
                            tracing::warn!(
                                instance_id = %instance_id,
                                "instance interrupted; unfinished activities will be re-dispatched on resume"
                            );
                            return Err(EngineError::Interrupted(instance_id));
                        }
                        joined = in_flight.join_next() => joined,
                    };

                    // Batch whatever else already finished into the same append.
                    let mut reports = Vec::new();
                    if let Some(joined) = first {
                        reports.push(joined.map_err(|e| EngineError::TaskJoin(e.to_string()))?);
                    }
                    while let Some(joined) = in_flight.try_join_next() {
                        reports.push(joined.map_err(|e| EngineError::TaskJoin(e.to_string()))?);
                    }
                    self.record(instance_id, &mut history, reports).await?;
                    continue;
                }
                TurnStatus::Completed(output) => EventKind::Completed { output },
                TurnStatus::Failed(failure) => EventKind::Failed { failure },
            };

            // Every scheduled activity is terminal before the instance is.
            while let Some(joined) = in_flight.join_next().await {
                let report = joined.map_err(|e| EngineError::TaskJoin(e.to_string()))?;
                self.record(instance_id, &mut history, vec![report]).await?;
            }

            return self
                .finish(instance_id, &history, terminal, activities_run)
                .await;
        }
    }

    /// Spawn one activity on the worker pool.
    fn dispatch(
        &self,
        in_flight: &mut JoinSet<ActivityReport>,
        semaphore: &Arc<Semaphore>,
        activity: ScheduledActivity,
    ) {
        let activities = Arc::clone(&self.activities);
        let semaphore = Arc::clone(semaphore);
        let policy = self.policy.clone();

        in_flight.spawn(async move {
            // The semaphore is never closed; a failed acquire just runs unbounded.
            let _permit = semaphore.acquire_owned().await.ok();
            execute_with_retry(activities.as_ref(), activity, &policy).await
        });
    }

    /// Journal the terminal events for finished activities.
    async fn record(
        &self,
        instance_id: Uuid,
        history: &mut Vec<HistoryEvent>,
        reports: Vec<ActivityReport>,
    ) -> Result<(), EngineError> {
        let mut seq = next_seq(history);
        let mut events = Vec::with_capacity(reports.len());
        let mut notifications = Vec::with_capacity(reports.len());

        for report in reports {
            match &report.outcome {
                Ok(_) => tracing::debug!(
                    instance_id = %instance_id,
                    seq = report.seq,
                    kind = %report.kind,
                    attempts = report.attempts,
                    "activity completed"
                ),
                Err(error) => tracing::warn!(
                    instance_id = %instance_id,
                    seq = report.seq,
                    kind = %report.kind,
                    attempts = report.attempts,
                    %error,
                    "activity failed"
                ),
            }

            notifications.push(EngineEvent::ActivityFinished {
                instance_id,
                seq: report.seq,
                kind: report.kind,
                succeeded: report.outcome.is_ok(),
                attempts: report.attempts,
                duration_ms: report.elapsed.as_millis() as u64,
            });

            let kind = match report.outcome {
                Ok(output) => EventKind::ActivityCompleted {
                    scheduled_seq: report.seq,
                    output,
                    attempts: report.attempts,
                },
                Err(error) => EventKind::ActivityFailed {
                    scheduled_seq: report.seq,
                    error,
                    attempts: report.attempts,
                },
            };
            events.push(HistoryEvent::new(seq, kind));
            seq += 1;
        }

        self.journal.append(instance_id, &events).await?;
        history.extend(events);
        for event in notifications {
            self.event_bus.publish(event);
        }
        Ok(())
    }

    async fn finish(
        &self,
        instance_id: Uuid,
        history: &[HistoryEvent],
        terminal: EventKind,
        activities_run: usize,
    ) -> Result<ExecutionResult, EngineError> {
        let event = HistoryEvent::new(next_seq(history), terminal);
        let status = self.journal.finish(instance_id, &event).await?;

        match &event.kind {
            EventKind::Failed { failure } => {
                tracing::warn!(instance_id = %instance_id, %failure, "instance failed");
            }
            kind => {
                tracing::info!(instance_id = %instance_id, terminal = kind.name(), "instance finished");
            }
        }
        self.event_bus
            .publish(EngineEvent::InstanceFinished { instance_id, status });

        ExecutionResult::from_terminal(instance_id, &event.kind, activities_run)
            .ok_or(EngineError::Journal(JournalError::NotTerminal(event.kind.name())))
    }

    async fn fail_non_deterministic(
        &self,
        instance_id: Uuid,
        history: &[HistoryEvent],
        violation: DeterminismViolation,
    ) -> Result<ExecutionResult, EngineError> {
        tracing::error!(instance_id = %instance_id, %violation, "determinism violation, failing instance");

        let event = HistoryEvent::new(
            next_seq(history),
            EventKind::Failed {
                failure: OrchestrationFailure::NonDeterministic(violation.clone()),
            },
        );
        let status = self.journal.finish(instance_id, &event).await?;
        self.event_bus
            .publish(EngineEvent::InstanceFinished { instance_id, status });

        Err(EngineError::NonDeterministic {
            instance_id,
            violation,
        })
    }

    fn announce_schedules(&self, instance_id: Uuid, scheduled: &[ScheduledActivity]) {
        let mut batches: Vec<(ActivityKind, usize)> = Vec::new();
        for activity in scheduled {
            match batches.last_mut() {
                Some((kind, count)) if *kind == activity.kind => *count += 1,
                _ => batches.push((activity.kind, 1)),
            }
        }

        for (kind, count) in batches {
            tracing::info!(instance_id = %instance_id, %kind, count, "scheduled activities");
            self.event_bus.publish(EngineEvent::ActivitiesScheduled {
                instance_id,
                kind,
                count,
            });
        }
    }
}

/// Run one activity to a terminal state under the dispatch policy.
async fn execute_with_retry<A: ActivityExecutor>(
    activities: &A,
    activity: ScheduledActivity,
    policy: &DispatchPolicy,
) -> ActivityReport {
    let started = Instant::now();
    let mut attempt = 0;

    let outcome = loop {
        attempt += 1;
        let result = tokio::time::timeout(
            policy.activity_timeout,
            invoke(activities, activity.kind, &activity.input),
        )
        .await
        .unwrap_or_else(|_| Err(ActivityError::timeout(policy.activity_timeout)));

        match result {
            Err(error)
                if RetryHandler::should_retry(&policy.retry, attempt, &error)
                    && !abandoned_attempt_may_still_run(activity.kind, &error) =>
            {
                let delay = RetryHandler::backoff_delay(&policy.retry, attempt);
                tracing::debug!(
                    seq = activity.seq,
                    kind = %activity.kind,
                    attempt,
                    %error,
                    delay_ms = delay.as_millis() as u64,
                    "retrying activity"
                );
                tokio::time::sleep(delay).await;
            }
            other => break other,
        }
    };

    ActivityReport {
        seq: activity.seq,
        kind: activity.kind,
        outcome,
        attempts: attempt,
        elapsed: started.elapsed(),
    }
}

/// A timed-out backup is dropped, but the file copy it started keeps running
/// on the blocking pool. Retrying would race a second copy onto the same
/// target, so backup timeouts are final.
fn abandoned_attempt_may_still_run(kind: ActivityKind, error: &ActivityError) -> bool {
    kind == ActivityKind::Backup && error.kind == ActivityErrorKind::Timeout
}

/// Scheduled activities that have no terminal event, in schedule order.
fn unresolved_schedules(history: &[HistoryEvent]) -> Vec<ScheduledActivity> {
    project_invocations(history)
        .into_iter()
        .filter(|inv| inv.status == ActivityStatus::Scheduled)
        .map(|inv| ScheduledActivity {
            seq: inv.seq,
            kind: inv.kind,
            input: inv.input,
        })
        .collect()
}

fn next_seq(history: &[HistoryEvent]) -> u64 {
    history.last().map_or(1, |event| event.seq + 1)
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("cannot encode orchestration input: {0}")]
    Input(String),

    /// Replay diverged from history. The instance has been marked Failed.
    #[error("instance {instance_id} diverged from its history: {violation}")]
    NonDeterministic {
        instance_id: Uuid,
        violation: DeterminismViolation,
    },

    #[error("instance {0} is already being driven")]
    AlreadyRunning(Uuid),

    /// Driving stopped on request; the instance is still Running.
    #[error("instance {0} was interrupted before finishing")]
    Interrupted(Uuid),

    /// The orchestration is pending on something that is not an activity.
    #[error("instance {0} is waiting with no activity in flight")]
    Stalled(Uuid),

    #[error("activity task failed: {0}")]
    TaskJoin(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
