//! History repository trait definition.
//!
//! Defines the storage interface for workflow instances and their
//! append-only history logs. The infrastructure layer (backvault-infra)
//! implements this trait with SQLite persistence.

use backvault_types::error::RepositoryError;
use backvault_types::history::HistoryEvent;
use backvault_types::instance::{InstanceStatus, WorkflowInstance};
use uuid::Uuid;

use super::SortOrder;

/// Repository trait for durable orchestration state.
///
/// Covers two entity families:
/// - **Instances:** one row per orchestration execution, with a cached status.
/// - **History:** the append-only event log each instance is replayed from.
///
/// Appends are exactly-once: an event whose `(instance_id, seq)` already
/// exists is rejected with [`RepositoryError::Conflict`] and nothing from the
/// batch is written.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait HistoryRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Create a new instance record together with its first history event,
    /// atomically.
    fn create_instance(
        &self,
        instance: &WorkflowInstance,
        started: &HistoryEvent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an instance by its UUID.
    fn get_instance(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// List instances, optionally filtered by status, ordered by creation time.
    fn list_instances(
        &self,
        status: Option<InstanceStatus>,
        order: SortOrder,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// Update an instance's cached status, replay cursor and error summary.
    ///
    /// Returns [`RepositoryError::NotFound`] if the instance does not exist.
    fn update_instance(
        &self,
        id: &Uuid,
        status: InstanceStatus,
        replay_cursor: u64,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Append a batch of events atomically.
    fn append_events(
        &self,
        instance_id: &Uuid,
        events: &[HistoryEvent],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load the full history of an instance, ordered by sequence number.
    fn load_history(
        &self,
        instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<HistoryEvent>, RepositoryError>> + Send;
}
