//! Backup path derivation.
//!
//! A file's backup lives next to its original tree: the path root (drive
//! designator and/or leading separator) is kept, `backup.` is inserted right
//! after it, and the remaining separators are normalised to `/`.
//!
//! ```text
//! /data/reports/q1.csv   ->  /backup.data/reports/q1.csv
//! C:\data\reports\q1.csv ->  C:\backup.data/reports/q1.csv
//! data/q1.csv            ->  backup.data/q1.csv
//! ```

use std::path::{Path, PathBuf};

/// Prefix inserted after the path root.
pub const BACKUP_PREFIX: &str = "backup.";

/// Derive the backup path for `source`.
pub fn derive_backup_path(source: &str) -> String {
    let (root, rest) = source.split_at(root_len(source));
    format!("{root}{BACKUP_PREFIX}{}", rest.replace('\\', "/"))
}

/// Re-root a derived backup path under `staging_root`.
///
/// The path root is dropped; a drive letter becomes a plain directory so
/// staged trees from different drives do not collide.
pub fn staged_path(staging_root: &Path, backup_path: &str) -> PathBuf {
    let len = root_len(backup_path);
    let (root, rest) = backup_path.split_at(len);

    let mut staged = staging_root.to_path_buf();
    if let Some(drive) = drive_letter(root) {
        staged.push(drive.to_string());
    }
    for part in rest.split(['/', '\\']).filter(|p| !p.is_empty()) {
        staged.push(part);
    }
    staged
}

/// Whether a top-level directory name belongs to a backup tree.
pub fn is_backup_dir_name(name: &str) -> bool {
    name.starts_with(BACKUP_PREFIX)
}

/// Length in bytes of the path root: an optional `X:` drive designator
/// followed by at most one separator.
fn root_len(path: &str) -> usize {
    let mut len = if drive_letter(path).is_some() { 2 } else { 0 };
    if matches!(path.as_bytes().get(len), Some(b'/' | b'\\')) {
        len += 1;
    }
    len
}

fn drive_letter(path: &str) -> Option<char> {
    let bytes = path.as_bytes();
    match bytes {
        [letter, b':', ..] if letter.is_ascii_alphabetic() => Some(*letter as char),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_absolute_path() {
        assert_eq!(
            derive_backup_path("/data/reports/q1.csv"),
            "/backup.data/reports/q1.csv"
        );
    }

    #[test]
    fn windows_drive_path_keeps_designator_and_normalises_rest() {
        assert_eq!(
            derive_backup_path(r"C:\data\reports\q1.csv"),
            r"C:\backup.data/reports/q1.csv"
        );
    }

    #[test]
    fn relative_path_has_empty_root() {
        assert_eq!(derive_backup_path("data/q1.csv"), "backup.data/q1.csv");
    }

    #[test]
    fn file_directly_under_root() {
        assert_eq!(derive_backup_path("/q1.csv"), "/backup.q1.csv");
    }

    #[test]
    fn staged_path_drops_root() {
        let staged = staged_path(Path::new("/tmp/stage"), "/backup.data/reports/q1.csv");
        assert_eq!(staged, PathBuf::from("/tmp/stage/backup.data/reports/q1.csv"));
    }

    #[test]
    fn staged_path_keeps_drive_as_directory() {
        let staged = staged_path(Path::new("/tmp/stage"), r"D:\backup.data/q1.csv");
        assert_eq!(staged, PathBuf::from("/tmp/stage/D/backup.data/q1.csv"));
    }

    #[test]
    fn backup_dir_names() {
        assert!(is_backup_dir_name("backup.data"));
        assert!(!is_backup_dir_name("data"));
    }
}
