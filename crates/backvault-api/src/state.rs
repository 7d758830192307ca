//! Application state wiring the engine to its concrete adapters.
//!
//! The engine is generic over repository/activity/orchestration traits;
//! AppState pins it to the SQLite history store, local filesystem activities
//! and the file backup orchestration.

use backvault_core::event::EventBus;
use backvault_core::workflow::backup::FileBackupOrchestration;
use backvault_core::workflow::checkpoint::HistoryJournal;
use backvault_core::workflow::executor::{DispatchPolicy, WorkflowEngine};
use backvault_infra::config::load_engine_config;
use backvault_infra::filesystem::{LocalFileActivities, resolve_data_dir};
use backvault_infra::sqlite::history::SqliteHistoryRepository;
use backvault_infra::sqlite::pool::{DatabasePool, database_url};
use backvault_types::config::EngineConfig;

/// Concrete engine type pinned to infra implementations.
pub type ConcreteEngine =
    WorkflowEngine<SqliteHistoryRepository, LocalFileActivities, FileBackupOrchestration>;

/// Event bus capacity. Progress rendering lags behind large fan-outs.
const EVENT_BUS_CAPACITY: usize = 1024;

/// Shared application state for CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub config: EngineConfig,
    pub history_repo: SqliteHistoryRepository,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_engine_config(&data_dir).await;
        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;
        let history_repo = SqliteHistoryRepository::new(db_pool);

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        Ok(Self {
            config,
            history_repo,
        })
    }

    /// The activity implementation configured for this data directory.
    pub fn activities(&self) -> LocalFileActivities {
        LocalFileActivities::new(self.config.staging_root.clone())
    }

    /// Read-only access to instances and their history.
    pub fn journal(&self) -> HistoryJournal<SqliteHistoryRepository> {
        HistoryJournal::new(self.history_repo.clone())
    }

    /// Build an engine with the configured dispatch policy.
    pub fn engine(&self) -> ConcreteEngine {
        WorkflowEngine::new(
            FileBackupOrchestration,
            self.history_repo.clone(),
            self.activities(),
            DispatchPolicy::from_config(&self.config),
            EventBus::new(EVENT_BUS_CAPACITY),
        )
    }
}
