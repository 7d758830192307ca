//! Durable history journal for orchestration instances.
//!
//! Wraps `HistoryRepository` with the operations the engine needs: create an
//! instance with its `Started` event, append events while keeping the
//! instance's replay cursor in step, and record the terminal outcome. Every
//! event is persisted before the engine acts on it, so a crashed instance
//! resumes from exactly what was recorded.

use backvault_types::error::RepositoryError;
use backvault_types::history::{EventKind, HistoryEvent};
use backvault_types::instance::{InstanceStatus, WorkflowInstance};
use uuid::Uuid;

use crate::repository::SortOrder;
use crate::repository::history::HistoryRepository;

// ---------------------------------------------------------------------------
// HistoryJournal
// ---------------------------------------------------------------------------

/// Generic over `R: HistoryRepository` so it works with any storage backend
/// (SQLite, in-memory, etc.).
pub struct HistoryJournal<R: HistoryRepository> {
    repo: R,
}

impl<R: HistoryRepository> HistoryJournal<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Create a running instance and record its `Started` event at seq 1.
    pub async fn start_instance(
        &self,
        orchestration: &str,
        input: serde_json::Value,
    ) -> Result<(WorkflowInstance, HistoryEvent), JournalError> {
        let root_path = match &input {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let mut instance = WorkflowInstance::new(orchestration, root_path);
        let started = HistoryEvent::new(
            1,
            EventKind::Started {
                orchestration: orchestration.to_string(),
                input,
            },
        );

        self.repo
            .create_instance(&instance, &started)
            .await
            .map_err(JournalError::from)?;
        instance.replay_cursor = started.seq;

        tracing::debug!(instance_id = %instance.id, orchestration, "journaled instance start");
        Ok((instance, started))
    }

    /// Load an instance and its full history.
    pub async fn load(
        &self,
        instance_id: Uuid,
    ) -> Result<(WorkflowInstance, Vec<HistoryEvent>), JournalError> {
        let instance = self
            .repo
            .get_instance(&instance_id)
            .await
            .map_err(JournalError::from)?
            .ok_or(JournalError::InstanceNotFound(instance_id))?;

        let history = self
            .repo
            .load_history(&instance_id)
            .await
            .map_err(JournalError::from)?;

        Ok((instance, history))
    }

    /// Append non-terminal events and advance the replay cursor.
    pub async fn append(
        &self,
        instance_id: Uuid,
        events: &[HistoryEvent],
    ) -> Result<(), JournalError> {
        let Some(last) = events.last() else {
            return Ok(());
        };

        self.repo
            .append_events(&instance_id, events)
            .await
            .map_err(JournalError::from)?;
        self.repo
            .update_instance(&instance_id, InstanceStatus::Running, last.seq, None)
            .await
            .map_err(JournalError::from)?;

        tracing::trace!(
            instance_id = %instance_id,
            count = events.len(),
            cursor = last.seq,
            "journaled events"
        );
        Ok(())
    }

    /// Append the terminal event and mark the instance finished.
    pub async fn finish(
        &self,
        instance_id: Uuid,
        terminal: &HistoryEvent,
    ) -> Result<InstanceStatus, JournalError> {
        let (status, error) = terminal_status(&terminal.kind)?;

        self.repo
            .append_events(&instance_id, std::slice::from_ref(terminal))
            .await
            .map_err(JournalError::from)?;
        self.repo
            .update_instance(&instance_id, status, terminal.seq, error.as_deref())
            .await
            .map_err(JournalError::from)?;

        tracing::debug!(instance_id = %instance_id, %status, "journaled terminal event");
        Ok(status)
    }

    /// Bring the cached instance row in line with a terminal event that is
    /// already in history.
    ///
    /// `finish` writes the event before the row, so a crash between the two
    /// leaves a finished history behind a `Running` row. Returns the
    /// recorded status.
    pub async fn reconcile(
        &self,
        instance: &WorkflowInstance,
        terminal: &HistoryEvent,
    ) -> Result<InstanceStatus, JournalError> {
        let (status, error) = terminal_status(&terminal.kind)?;
        if instance.status == status && instance.replay_cursor == terminal.seq {
            return Ok(status);
        }

        self.repo
            .update_instance(&instance.id, status, terminal.seq, error.as_deref())
            .await
            .map_err(JournalError::from)?;

        tracing::warn!(
            instance_id = %instance.id,
            cached = %instance.status,
            %status,
            "repaired instance status from recorded terminal event"
        );
        Ok(status)
    }

    /// Instances that have not reached a terminal state, oldest first.
    pub async fn unfinished(&self) -> Result<Vec<WorkflowInstance>, JournalError> {
        self.repo
            .list_instances(Some(InstanceStatus::Running), SortOrder::Asc)
            .await
            .map_err(JournalError::from)
    }

    /// Instances, optionally filtered by status, newest first.
    pub async fn list(
        &self,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>, JournalError> {
        self.repo
            .list_instances(status, SortOrder::Desc)
            .await
            .map_err(JournalError::from)
    }
}

fn terminal_status(kind: &EventKind) -> Result<(InstanceStatus, Option<String>), JournalError> {
    match kind {
        EventKind::Completed { .. } => Ok((InstanceStatus::Completed, None)),
        EventKind::Failed { failure } => Ok((InstanceStatus::Failed, Some(failure.to_string()))),
        other => Err(JournalError::NotTerminal(other.name())),
    }
}

// ---------------------------------------------------------------------------
// JournalError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal repository error: {0}")]
    Repository(String),

    /// Another writer already recorded an event at this sequence number.
    #[error("sequence conflict: {0}")]
    SequenceConflict(String),

    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("'{0}' is not a terminal event")]
    NotTerminal(&'static str),
}

impl From<RepositoryError> for JournalError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(msg) => JournalError::SequenceConflict(msg),
            other => JournalError::Repository(other.to_string()),
        }
    }
}
