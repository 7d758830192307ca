//! SQLite history repository implementation.
//!
//! Implements `HistoryRepository` from `backvault-core` using sqlx with split
//! read/write pools. Each history event is one row keyed by
//! `(instance_id, seq)`; the event body is stored as a JSON payload.

use backvault_core::repository::SortOrder;
use backvault_core::repository::history::HistoryRepository;
use backvault_types::error::RepositoryError;
use backvault_types::history::{EventKind, HistoryEvent};
use backvault_types::instance::{InstanceStatus, WorkflowInstance};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `HistoryRepository`.
#[derive(Clone)]
pub struct SqliteHistoryRepository {
    pool: DatabasePool,
}

impl SqliteHistoryRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct InstanceRow {
    id: String,
    orchestration: String,
    status: String,
    root_path: String,
    replay_cursor: i64,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl InstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            orchestration: row.try_get("orchestration")?,
            status: row.try_get("status")?,
            root_path: row.try_get("root_path")?,
            replay_cursor: row.try_get("replay_cursor")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_instance(self) -> Result<WorkflowInstance, RepositoryError> {
        let status = self
            .status
            .parse::<InstanceStatus>()
            .map_err(RepositoryError::Query)?;

        Ok(WorkflowInstance {
            id: parse_uuid(&self.id)?,
            orchestration: self.orchestration,
            status,
            root_path: self.root_path,
            replay_cursor: self.replay_cursor.max(0) as u64,
            error: self.error,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct EventRow {
    seq: i64,
    payload: String,
    recorded_at: String,
}

impl EventRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            seq: row.try_get("seq")?,
            payload: row.try_get("payload")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn into_event(self) -> Result<HistoryEvent, RepositoryError> {
        let kind: EventKind = serde_json::from_str(&self.payload).map_err(|e| {
            RepositoryError::Query(format!("invalid event payload at seq {}: {e}", self.seq))
        })?;

        Ok(HistoryEvent {
            seq: self.seq.max(0) as u64,
            recorded_at: parse_datetime(&self.recorded_at)?,
            kind,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn encode_kind(kind: &EventKind) -> Result<String, RepositoryError> {
    serde_json::to_string(kind)
        .map_err(|e| RepositoryError::Query(format!("serialize event: {e}")))
}

/// Map an insert error, turning primary key violations into `Conflict`.
fn insert_error(e: sqlx::Error, instance_id: &Uuid, seq: u64) -> RepositoryError {
    match e {
        sqlx::Error::Database(ref db_err)
            if db_err.message().contains("UNIQUE") || db_err.message().contains("PRIMARY KEY") =>
        {
            RepositoryError::Conflict(format!(
                "seq {seq} already recorded for instance {instance_id}"
            ))
        }
        e => RepositoryError::Query(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// HistoryRepository impl
// ---------------------------------------------------------------------------

impl HistoryRepository for SqliteHistoryRepository {
    async fn create_instance(
        &self,
        instance: &WorkflowInstance,
        started: &HistoryEvent,
    ) -> Result<(), RepositoryError> {
        let payload = encode_kind(&started.kind)?;

        // Instance row and its first event land together or not at all.
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_instances
               (id, orchestration, status, root_path, replay_cursor, error, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(instance.id.to_string())
        .bind(&instance.orchestration)
        .bind(instance.status.to_string())
        .bind(&instance.root_path)
        .bind(started.seq as i64)
        .bind(&instance.error)
        .bind(format_datetime(&instance.created_at))
        .bind(format_datetime(&instance.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.message().contains("UNIQUE") => {
                RepositoryError::Conflict(format!("instance {} already exists", instance.id))
            }
            e => RepositoryError::Query(e.to_string()),
        })?;

        sqlx::query(
            "INSERT INTO history_events (instance_id, seq, event_type, payload, recorded_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(instance.id.to_string())
        .bind(started.seq as i64)
        .bind(started.kind.name())
        .bind(&payload)
        .bind(format_datetime(&started.recorded_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| insert_error(e, &instance.id, started.seq))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = InstanceRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_instance()?))
            }
            None => Ok(None),
        }
    }

    async fn list_instances(
        &self,
        status: Option<InstanceStatus>,
        order: SortOrder,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        // UUIDv7 text sorts by creation time; id breaks created_at ties.
        let direction = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let rows = match status {
            Some(s) => {
                let sql = format!(
                    "SELECT * FROM workflow_instances WHERE status = ? ORDER BY created_at {direction}, id {direction}"
                );
                sqlx::query(&sql)
                    .bind(s.to_string())
                    .fetch_all(&self.pool.reader)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT * FROM workflow_instances ORDER BY created_at {direction}, id {direction}"
                );
                sqlx::query(&sql).fetch_all(&self.pool.reader).await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = InstanceRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            instances.push(r.into_instance()?);
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
        let result = sqlx::query(
            "UPDATE workflow_instances SET status = ?, replay_cursor = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(replay_cursor as i64)
        .bind(error)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn append_events(
        &self,
        instance_id: &Uuid,
        events: &[HistoryEvent],
    ) -> Result<(), RepositoryError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let last: Option<i64> =
            sqlx::query_scalar("SELECT MAX(seq) FROM history_events WHERE instance_id = ?")
                .bind(instance_id.to_string())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let Some(mut last) = last.map(|s| s.max(0) as u64) else {
            return Err(RepositoryError::NotFound);
        };

        for event in events {
            if event.seq <= last {
                return Err(RepositoryError::Conflict(format!(
                    "seq {} already recorded for instance {instance_id}",
                    event.seq
                )));
            }
            last = event.seq;

            sqlx::query(
                "INSERT INTO history_events (instance_id, seq, event_type, payload, recorded_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(instance_id.to_string())
            .bind(event.seq as i64)
            .bind(event.kind.name())
            .bind(encode_kind(&event.kind)?)
            .bind(format_datetime(&event.recorded_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| insert_error(e, instance_id, event.seq))?;
        }

        // Dropping `tx` on any early return above rolls the batch back.
        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn load_history(&self, instance_id: &Uuid) -> Result<Vec<HistoryEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT seq, payload, recorded_at FROM history_events WHERE instance_id = ? ORDER BY seq ASC",
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if rows.is_empty() {
            return Err(RepositoryError::NotFound);
        }

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = EventRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            events.push(r.into_event()?);
        }
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
