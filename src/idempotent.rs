// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent operation tracking.
//!
//! Wrap a mutating operation so that the path it touches is fingerprinted
//! right before and right after it runs. Comparing both fingerprints tells
//! whether the operation actually changed anything, or whether it was a
//! no-op.
//!
//! The comparison is observational. The operation always runs, and its result
//! is always handed back untouched. A fingerprint that cannot be taken only
//! makes the outcome unknown, and a path that does not exist is simply
//! fingerprinted as absent.
//!
//! # See Also
//!
//! 1. [`crate::fingerprint`]

use crate::fingerprint::{
    fingerprint_file,
    states_equal,
    walk::{changed_paths, directory_states_equal, fingerprint_directory, DirectoryState},
    FileState,
};

use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What an operation did to the path it was tracked on.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeReport {
    /// Path that was tracked.
    pub path: PathBuf,

    /// Operation changed the path. `None` if a fingerprint was unavailable.
    pub changed: Option<bool>,

    /// Relative paths that changed under a tracked directory.
    pub changed_paths: Vec<PathBuf>,
}

impl ChangeReport {
    /// Operation was known to change nothing.
    pub fn is_noop(&self) -> bool {
        self.changed == Some(false)
    }

    fn log(&self) {
        match self.changed {
            Some(changed) => info!(
                path = ?self.path,
                changed,
                changed_paths = ?self.changed_paths,
                "operation finished"
            ),
            None => debug!(path = ?self.path, "operation finished, change unknown"),
        }
    }
}

/// Run operation, and log whether it changed a file.
///
/// # Errors
///
/// - Return the operation's own error untouched.
pub fn with_idempotency_check<T, E>(
    path: impl AsRef<Path>,
    operation: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    track_changes(path, operation).map(|(value, _)| value)
}

/// Run operation, and log which entries under a directory it changed.
///
/// # Errors
///
/// - Return the operation's own error untouched.
pub fn with_directory_idempotency_check<T, E>(
    path: impl AsRef<Path>,
    recursive: bool,
    operation: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    track_directory_changes(path, recursive, operation).map(|(value, _)| value)
}

/// Run operation, and report whether it changed a file.
///
/// # Errors
///
/// - Return the operation's own error untouched. No fingerprint is taken
///   after a failed operation.
pub fn track_changes<T, E>(
    path: impl AsRef<Path>,
    operation: impl FnOnce() -> Result<T, E>,
) -> Result<(T, ChangeReport), E> {
    let path = path.as_ref();
    let before = capture_file(path);
    let value = operation()?;
    let after = capture_file(path);

    let report = ChangeReport {
        path: path.to_path_buf(),
        changed: before
            .zip(after)
            .map(|(before, after)| !states_equal(&before, &after)),
        changed_paths: Vec::new(),
    };
    report.log();

    Ok((value, report))
}

/// Run operation, and report which entries under a directory it changed.
///
/// # Errors
///
/// - Return the operation's own error untouched. No fingerprint is taken
///   after a failed operation.
pub fn track_directory_changes<T, E>(
    path: impl AsRef<Path>,
    recursive: bool,
    operation: impl FnOnce() -> Result<T, E>,
) -> Result<(T, ChangeReport), E> {
    let path = path.as_ref();
    let before = capture_directory(path, recursive);
    let value = operation()?;
    let after = capture_directory(path, recursive);

    let report = match before.zip(after) {
        Some((before, after)) => ChangeReport {
            path: path.to_path_buf(),
            changed: Some(!directory_states_equal(&before, &after)),
            changed_paths: changed_paths(&before, &after),
        },
        None => ChangeReport {
            path: path.to_path_buf(),
            ..Default::default()
        },
    };
    report.log();

    Ok((value, report))
}

fn capture_file(path: &Path) -> Option<FileState> {
    match fingerprint_file(path) {
        Ok(state) => Some(state),
        Err(err) if err.is_not_found() => Some(FileState::absent(path)),
        Err(err) => {
            debug!("cannot fingerprint {:?}: {err}", path.display());
            None
        }
    }
}

fn capture_directory(path: &Path, recursive: bool) -> Option<DirectoryState> {
    match fingerprint_directory(path, recursive) {
        Ok(state) => Some(state),
        Err(err) if err.is_not_found() => Some(DirectoryState::absent(path)),
        Err(err) => {
            debug!("cannot fingerprint {:?}: {err}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn rewriting_same_content_is_noop() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("app.conf");
        fs::write(&path, "same")?;

        let (_, report) = track_changes(&path, || fs::write(&path, "same"))?;
        assert!(report.is_noop());

        Ok(())
    }

    #[test]
    fn new_content_is_change() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("app.conf");
        fs::write(&path, "old")?;

        let (_, report) = track_changes(&path, || fs::write(&path, "new"))?;
        assert_eq!(report.changed, Some(true));

        Ok(())
    }

    #[test]
    fn creating_missing_file_is_change() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("fresh.conf");

        let (_, report) = track_changes(&path, || fs::write(&path, "hi"))?;
        assert_eq!(report.changed, Some(true));

        let ghost = dir.path().join("ghost.conf");
        let (_, report) = track_changes(&ghost, || Ok::<_, std::io::Error>(()))?;
        assert!(report.is_noop());

        Ok(())
    }

    #[test]
    fn operation_error_is_returned_untouched() {
        let mut ran = false;
        let result: Result<(), &str> = with_idempotency_check("/nowhere/at/all", || {
            ran = true;
            Err("boom")
        });

        assert!(ran);
        assert_eq!(result, Err("boom"));
    }

    #[test]
    fn operation_value_is_returned() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let value = with_idempotency_check(dir.path().join("x"), || Ok::<_, std::io::Error>(42))?;
        assert_eq!(value, 42);

        Ok(())
    }

    #[test]
    fn directory_changes_are_listed() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("nested"))?;
        fs::write(dir.path().join("keep.conf"), "keep")?;
        fs::write(dir.path().join("edit.conf"), "before")?;
        fs::write(dir.path().join("nested/drop.conf"), "drop")?;

        let (_, report) = track_directory_changes(dir.path(), true, || {
            fs::write(dir.path().join("edit.conf"), "after")?;
            fs::remove_file(dir.path().join("nested/drop.conf"))?;
            fs::write(dir.path().join("add.conf"), "add")
        })?;

        assert_eq!(report.changed, Some(true));
        assert_eq!(
            report.changed_paths,
            vec![
                PathBuf::from("add.conf"),
                PathBuf::from("edit.conf"),
                PathBuf::from("nested/drop.conf"),
            ]
        );

        Ok(())
    }

    #[test]
    fn untouched_directory_is_noop() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.conf"), "a")?;

        let value = with_directory_idempotency_check(dir.path(), false, || {
            Ok::<_, std::io::Error>("done")
        })?;
        assert_eq!(value, "done");

        let (_, report) =
            track_directory_changes(dir.path(), false, || Ok::<_, std::io::Error>(()))?;
        assert!(report.is_noop());
        assert!(report.changed_paths.is_empty());

        Ok(())
    }
}
