//! Local filesystem activities: directory discovery and file backup.
//!
//! All I/O goes through `tokio::fs`. Each call is a single attempt; a failing
//! call returns its captured `io::Error` as an `ActivityError` and the engine
//! decides whether to retry.

use std::path::{Path, PathBuf};

use backvault_core::activity::ActivityExecutor;
use backvault_core::activity::path::{derive_backup_path, is_backup_dir_name, staged_path};
use backvault_types::activity::{ActivityError, ActivityErrorKind};

/// `ActivityExecutor` backed by the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalFileActivities {
    /// When set, backups are written under this directory instead of next
    /// to their source tree.
    staging_root: Option<PathBuf>,
}

impl LocalFileActivities {
    pub fn new(staging_root: Option<PathBuf>) -> Self {
        Self { staging_root }
    }

    /// Where `source` is written to by `back_up`.
    pub fn target_path(&self, source: &str) -> PathBuf {
        let backup_path = derive_backup_path(source);
        match &self.staging_root {
            Some(root) => staged_path(root, &backup_path),
            None => PathBuf::from(backup_path),
        }
    }
}

impl ActivityExecutor for LocalFileActivities {
    async fn discover(&self, root: &str) -> Result<Vec<String>, ActivityError> {
        let root_path = Path::new(root);
        let metadata = tokio::fs::metadata(root_path).await?;
        if !metadata.is_dir() {
            return Err(ActivityError::new(
                ActivityErrorKind::NotFound,
                format!("{root} is not a directory"),
            ));
        }

        // A backup tree only sits inside the walked tree when walking from
        // the filesystem root.
        let skip_backup_trees = root_path.parent().is_none();

        let mut files = Vec::new();
        let mut pending = vec![root_path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = Vec::new();
            let mut reader = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = reader.next_entry().await? {
                entries.push(entry);
            }
            entries.sort_by_key(|e| e.file_name());

            let mut subdirs = Vec::new();
            for entry in entries {
                let path = entry.path();
                let Some(path_str) = path.to_str().map(str::to_string) else {
                    tracing::warn!(path = %path.display(), "skipping path that is not valid UTF-8");
                    continue;
                };

                // file_type() does not follow symlinks.
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    let at_root = dir.as_path() == root_path;
                    let name = entry.file_name();
                    if skip_backup_trees
                        && at_root
                        && name.to_str().is_some_and(is_backup_dir_name)
                    {
                        tracing::debug!(path = %path_str, "skipping backup tree");
                        continue;
                    }
                    subdirs.push(path);
                } else if file_type.is_file() {
                    files.push(path_str);
                } else if file_type.is_symlink() {
                    // Symlinked files are backed up; symlinked directories are not walked.
                    if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
                        files.push(path_str);
                    }
                }
            }

            // Depth-first, in name order.
            pending.extend(subdirs.into_iter().rev());
        }

        tracing::debug!(root, files = files.len(), "discovery finished");
        Ok(files)
    }

    async fn back_up(&self, source: &str) -> Result<u64, ActivityError> {
        let target = self.target_path(source);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = tokio::fs::copy(source, &target).await?;
        tracing::debug!(source, target = %target.display(), bytes, "file backed up");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn write(path: &Path, content: &str) {
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(path, content).await.unwrap();
    }

    fn s(path: &Path) -> String {
        path.to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_discover_walks_recursively_in_name_order() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        write(&root.join("b.txt"), "b").await;
        write(&root.join("a.txt"), "a").await;
        write(&root.join("sub").join("z.txt"), "z").await;
        write(&root.join("sub").join("deeper").join("y.txt"), "y").await;
        tokio::fs::create_dir_all(root.join("empty")).await.unwrap();

        let files = LocalFileActivities::default()
            .discover(&s(&root))
            .await
            .unwrap();

        assert_eq!(
            files,
            vec![
                s(&root.join("a.txt")),
                s(&root.join("b.txt")),
                s(&root.join("sub").join("deeper").join("y.txt")),
                s(&root.join("sub").join("z.txt")),
            ]
        );
    }

    #[tokio::test]
    async fn test_discover_empty_directory() {
        let dir = tempdir().unwrap();
        let files = LocalFileActivities::default()
            .discover(&s(dir.path()))
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_discover_missing_root_is_not_found() {
        let dir = tempdir().unwrap();
        let err = LocalFileActivities::default()
            .discover(&s(&dir.path().join("nope")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ActivityErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_discover_does_not_follow_symlinked_directories() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        let outside = dir.path().join("outside");
        write(&root.join("a.txt"), "a").await;
        write(&outside.join("secret.txt"), "s").await;
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let files = LocalFileActivities::default()
            .discover(&s(&root))
            .await
            .unwrap();
        assert_eq!(files, vec![s(&root.join("a.txt"))]);
    }

    #[tokio::test]
    async fn test_back_up_into_staging_root() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("data").join("reports").join("q1.csv");
        write(&source, "revenue,42\n").await;
        let staging = dir.path().join("staging");

        let activities = LocalFileActivities::new(Some(staging.clone()));
        let bytes = activities.back_up(&s(&source)).await.unwrap();
        assert_eq!(bytes, 11);

        let target = activities.target_path(&s(&source));
        assert!(target.starts_with(&staging));
        assert!(s(&target).contains("backup."));
        assert_eq!(
            tokio::fs::read_to_string(&target).await.unwrap(),
            "revenue,42\n"
        );
    }

    #[tokio::test]
    async fn test_back_up_is_idempotent() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("data").join("a.bin");
        write(&source, "0123456789").await;
        let activities = LocalFileActivities::new(Some(dir.path().join("staging")));

        let first = activities.back_up(&s(&source)).await.unwrap();
        let second = activities.back_up(&s(&source)).await.unwrap();
        assert_eq!(first, 10);
        assert_eq!(second, 10);

        // A later run copies the source as it is now, replacing the old backup.
        write(&source, "abc").await;
        let third = activities.back_up(&s(&source)).await.unwrap();
        assert_eq!(third, 3);
        let target = activities.target_path(&s(&source));
        assert_eq!(tokio::fs::read_to_string(&target).await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_back_up_missing_source_fails_with_not_found() {
        let dir = tempdir().unwrap();
        let activities = LocalFileActivities::new(Some(dir.path().join("staging")));
        let err = activities
            .back_up(&s(&dir.path().join("missing.txt")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ActivityErrorKind::NotFound);
    }

    #[test]
    fn test_target_path_without_staging_is_derived_path() {
        let activities = LocalFileActivities::default();
        assert_eq!(
            activities.target_path("/data/reports/q1.csv"),
            PathBuf::from("/backup.data/reports/q1.csv")
        );
    }
}
