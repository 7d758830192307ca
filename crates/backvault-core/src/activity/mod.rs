//! Activity executor port.
//!
//! Activities are the side-effecting half of an orchestration: the engine
//! runs them on worker tasks and records their terminal state in history.
//! The infrastructure layer (backvault-infra) implements the trait against
//! the local filesystem.

pub mod path;

#[cfg(test)]
pub(crate) mod scripted;

use backvault_types::activity::{ActivityError, ActivityKind};
use serde_json::Value;

/// Executes the activities the backup orchestration schedules.
///
/// Implementations must be safe to call concurrently. Each call is one
/// attempt; retry and timeout are applied by the engine.
pub trait ActivityExecutor: Send + Sync + 'static {
    /// Recursively enumerate the files under `root`, in a stable order.
    fn discover(
        &self,
        root: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, ActivityError>> + Send;

    /// Copy `source` to its derived backup path, returning the bytes copied.
    fn back_up(
        &self,
        source: &str,
    ) -> impl std::future::Future<Output = Result<u64, ActivityError>> + Send;
}

/// Run one activity from its recorded kind and JSON input.
///
/// Both activity kinds take a single path string.
pub async fn invoke<A: ActivityExecutor>(
    activities: &A,
    kind: ActivityKind,
    input: &Value,
) -> Result<Value, ActivityError> {
    let arg = input
        .as_str()
        .ok_or_else(|| ActivityError::other(format!("{kind} input must be a path, got {input}")))?;

    match kind {
        ActivityKind::Discovery => activities.discover(arg).await.map(Value::from),
        ActivityKind::Backup => activities.back_up(arg).await.map(Value::from),
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedActivities;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn invoke_routes_by_kind() {
        let activities = ScriptedActivities::new().with_file("/data/a", 3);

        let listed = invoke(&activities, ActivityKind::Discovery, &json!("/data"))
            .await
            .unwrap();
        assert_eq!(listed, json!(["/data/a"]));

        let bytes = invoke(&activities, ActivityKind::Backup, &json!("/data/a"))
            .await
            .unwrap();
        assert_eq!(bytes, json!(3));
    }

    #[tokio::test]
    async fn invoke_rejects_non_string_input() {
        let activities = ScriptedActivities::new();
        let err = invoke(&activities, ActivityKind::Backup, &json!(7))
            .await
            .unwrap_err();
        assert!(err.message.contains("must be a path"));
    }
}
