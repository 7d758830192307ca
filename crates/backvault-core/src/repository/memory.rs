//! In-memory `HistoryRepository`.
//!
//! Used by the engine tests and for throwaway runs. Clones share state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use backvault_types::error::RepositoryError;
use backvault_types::history::HistoryEvent;
use backvault_types::instance::{InstanceStatus, WorkflowInstance};
use chrono::Utc;
use uuid::Uuid;

use super::SortOrder;
use super::history::HistoryRepository;

#[derive(Debug, Default)]
struct MemoryState {
    instances: HashMap<Uuid, WorkflowInstance>,
    events: HashMap<Uuid, Vec<HistoryEvent>>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryHistoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, RepositoryError> {
        self.state.lock().map_err(|_| RepositoryError::Connection)
    }
}

impl HistoryRepository for InMemoryHistoryRepository {
    async fn create_instance(
        &self,
        instance: &WorkflowInstance,
        started: &HistoryEvent,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if state.instances.contains_key(&instance.id) {
            return Err(RepositoryError::Conflict(format!(
                "instance {} already exists",
                instance.id
            )));
        }
        let mut instance = instance.clone();
        instance.replay_cursor = started.seq;
        state.events.insert(instance.id, vec![started.clone()]);
        state.instances.insert(instance.id, instance);
        Ok(())
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Ok(self.lock()?.instances.get(id).cloned())
    }

    async fn list_instances(
        &self,
        status: Option<InstanceStatus>,
        order: SortOrder,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let state = self.lock()?;
        let mut instances: Vec<WorkflowInstance> = state
            .instances
            .values()
            .filter(|i| status.is_none_or(|s| i.status == s))
            .cloned()
            .collect();
        // UUIDv7 ids sort by creation time.
        instances.sort_by_key(|i| i.id);
        if order == SortOrder::Desc {
            instances.reverse();
        }
        Ok(instances)
    }

    async fn update_instance(
        &self,
        id: &Uuid,
        status: InstanceStatus,
        replay_cursor: u64,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let instance = state
            .instances
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        instance.status = status;
        instance.replay_cursor = replay_cursor;
        instance.error = error.map(str::to_string);
        instance.updated_at = Utc::now();
        Ok(())
    }

    async fn append_events(
        &self,
        instance_id: &Uuid,
        events: &[HistoryEvent],
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let log = state
            .events
            .get_mut(instance_id)
            .ok_or(RepositoryError::NotFound)?;

        // Validate the whole batch before writing anything.
        let mut last = log.last().map(|e| e.seq).unwrap_or(0);
        for event in events {
            if event.seq <= last {
                return Err(RepositoryError::Conflict(format!(
                    "seq {} already recorded for instance {instance_id}",
                    event.seq
                )));
            }
            last = event.seq;
        }

        log.extend_from_slice(events);
        Ok(())
    }

    async fn load_history(&self, instance_id: &Uuid) -> Result<Vec<HistoryEvent>, RepositoryError> {
        self.lock()?
            .events
            .get(instance_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backvault_types::history::EventKind;
    use serde_json::json;

    fn started(seq: u64) -> HistoryEvent {
        HistoryEvent::new(
            seq,
            EventKind::Started {
                orchestration: "file_backup".into(),
                input: json!("/data"),
            },
        )
    }

    fn completed(seq: u64) -> HistoryEvent {
        HistoryEvent::new(seq, EventKind::Completed { output: json!(0) })
    }

    #[tokio::test]
    async fn append_and_load_preserves_order() {
        let repo = InMemoryHistoryRepository::new();
        let instance = WorkflowInstance::new("file_backup", "/data");
        repo.create_instance(&instance, &started(1)).await.unwrap();
        repo.append_events(&instance.id, &[completed(2)]).await.unwrap();

        let history = repo.load_history(&instance.id).await.unwrap();
        let seqs: Vec<u64> = history.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn duplicate_seq_is_conflict_and_batch_is_not_written() {
        let repo = InMemoryHistoryRepository::new();
        let instance = WorkflowInstance::new("file_backup", "/data");
        repo.create_instance(&instance, &started(1)).await.unwrap();

        let err = repo
            .append_events(&instance.id, &[completed(2), completed(2)])
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let err = repo
            .append_events(&instance.id, &[started(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        assert_eq!(repo.load_history(&instance.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_and_filter_instances() {
        let repo = InMemoryHistoryRepository::new();
        let a = WorkflowInstance::new("file_backup", "/a");
        let b = WorkflowInstance::new("file_backup", "/b");
        repo.create_instance(&a, &started(1)).await.unwrap();
        repo.create_instance(&b, &started(1)).await.unwrap();

        repo.update_instance(&a.id, InstanceStatus::Completed, 5, None)
            .await
            .unwrap();

        let running = repo
            .list_instances(Some(InstanceStatus::Running), SortOrder::Desc)
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, b.id);

        let all = repo.list_instances(None, SortOrder::Asc).await.unwrap();
        assert_eq!(all[0].id, a.id);
        assert_eq!(all[0].replay_cursor, 5);

        let missing = repo
            .update_instance(&Uuid::now_v7(), InstanceStatus::Failed, 0, Some("x"))
            .await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }
}
