//! Scripted activity executor for engine and orchestration tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backvault_types::activity::{ActivityError, ActivityErrorKind};

use super::ActivityExecutor;

/// In-memory file tree with per-file failure and latency knobs.
#[derive(Default)]
pub(crate) struct ScriptedActivities {
    files: BTreeMap<String, u64>,
    failing: HashMap<String, ActivityErrorKind>,
    /// Paths that fail once with `Other` and then succeed.
    flaky: Mutex<HashSet<String>>,
    delays: HashMap<String, Duration>,
    backup_calls: Mutex<Vec<String>>,
    discovery_calls: AtomicU32,
}

impl ScriptedActivities {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_file(mut self, path: &str, bytes: u64) -> Self {
        self.files.insert(path.to_string(), bytes);
        self
    }

    pub(crate) fn failing(mut self, path: &str, kind: ActivityErrorKind) -> Self {
        self.failing.insert(path.to_string(), kind);
        self
    }

    pub(crate) fn flaky(self, path: &str) -> Self {
        if let Ok(mut flaky) = self.flaky.lock() {
            flaky.insert(path.to_string());
        }
        self
    }

    pub(crate) fn delayed(mut self, path: &str, delay: Duration) -> Self {
        self.delays.insert(path.to_string(), delay);
        self
    }

    pub(crate) fn backup_calls(&self) -> Vec<String> {
        self.backup_calls.lock().unwrap().clone()
    }

    pub(crate) fn discovery_calls(&self) -> u32 {
        self.discovery_calls.load(Ordering::SeqCst)
    }
}

impl ActivityExecutor for ScriptedActivities {
    async fn discover(&self, root: &str) -> Result<Vec<String>, ActivityError> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.failing.get(root) {
            return Err(ActivityError::new(*kind, format!("cannot list {root}")));
        }
        Ok(self
            .files
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect())
    }

    async fn back_up(&self, source: &str) -> Result<u64, ActivityError> {
        self.backup_calls.lock().unwrap().push(source.to_string());

        if let Some(delay) = self.delays.get(source) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(kind) = self.failing.get(source) {
            return Err(ActivityError::new(*kind, format!("cannot copy {source}")));
        }
        if self.flaky.lock().unwrap().remove(source) {
            return Err(ActivityError::other(format!("transient error on {source}")));
        }
        self.files
            .get(source)
            .copied()
            .ok_or_else(|| ActivityError::new(ActivityErrorKind::NotFound, source.to_string()))
    }
}
