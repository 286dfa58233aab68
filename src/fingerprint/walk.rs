// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Directory tree fingerprinting.
//!
//! Walk a directory, either recursively or one level deep, and fingerprint
//! every leaf entry. Directories themselves are left out of the resulting
//! map. Only files and symlinks are recorded, keyed by their path relative to
//! the walk root.
//!
//! # Failure Policy
//!
//! By default the walk fails closed: one unreadable child fails the whole
//! fingerprint, since a partial fingerprint could hide a change. Callers that
//! can live with partial fingerprints may opt into
//! [`WalkPolicy::SkipUnreadable`].

use crate::fingerprint::{fingerprint_file, states_equal, FileState, FingerprintError, Result};

use ignore::WalkBuilder;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{debug, instrument, warn};

/// Aggregate fingerprint of a directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryState {
    /// Root of the walk.
    pub path: PathBuf,

    /// Root existed when fingerprinted.
    pub exists: bool,

    /// Number of leaf entries recorded.
    pub file_count: usize,

    /// Modification time of the root.
    pub modified: Option<SystemTime>,

    /// Leaf fingerprints keyed by path relative to root.
    pub files: BTreeMap<PathBuf, FileState>,
}

impl DirectoryState {
    /// Construct fingerprint of a directory that does not exist.
    pub fn absent(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            exists: false,
            file_count: 0,
            modified: None,
            files: BTreeMap::new(),
        }
    }
}

/// What to do when a child entry cannot be fingerprinted.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum WalkPolicy {
    /// Fail the whole walk on first error.
    #[default]
    FailClosed,

    /// Log and leave out entries that cannot be read.
    SkipUnreadable,
}

/// Options for directory fingerprinting.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct WalkOptions {
    /// Descend into subdirectories.
    pub recursive: bool,

    /// Child failure handling.
    pub policy: WalkPolicy,
}

/// Fingerprint directory tree with the default fail-closed policy.
///
/// # Errors
///
/// - Return [`FingerprintError::NotFound`] if root does not exist.
/// - Return [`FingerprintError::NotADirectory`] if root is not a directory.
/// - Return any error raised while walking or fingerprinting children.
pub fn fingerprint_directory(path: impl AsRef<Path>, recursive: bool) -> Result<DirectoryState> {
    fingerprint_directory_with(
        path,
        WalkOptions {
            recursive,
            ..Default::default()
        },
    )
}

/// Fingerprint directory tree with explicit walk options.
///
/// # Errors
///
/// - Return [`FingerprintError::NotFound`] if root does not exist.
/// - Return [`FingerprintError::NotADirectory`] if root is not a directory.
/// - Return [`FingerprintError::Walk`] if walker fails under
///   [`WalkPolicy::FailClosed`].
/// - Return child fingerprint errors under [`WalkPolicy::FailClosed`].
#[instrument(skip(path), level = "debug")]
pub fn fingerprint_directory_with(
    path: impl AsRef<Path>,
    options: WalkOptions,
) -> Result<DirectoryState> {
    let root = path.as_ref();
    let metadata = fs::symlink_metadata(root).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            FingerprintError::NotFound {
                path: root.to_path_buf(),
            }
        } else {
            FingerprintError::Stat {
                source: err,
                path: root.to_path_buf(),
            }
        }
    })?;

    if !metadata.is_dir() {
        return Err(FingerprintError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|lhs, rhs| lhs.cmp(rhs));
    if !options.recursive {
        builder.max_depth(Some(1));
    }

    let mut files = BTreeMap::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => match options.policy {
                WalkPolicy::FailClosed => {
                    warn!("walk of {:?} failed: {err}", root.display());
                    return Err(FingerprintError::Walk {
                        source: err,
                        path: root.to_path_buf(),
                    });
                }
                WalkPolicy::SkipUnreadable => {
                    warn!("skip unreadable entry under {:?}: {err}", root.display());
                    continue;
                }
            },
        };

        // INVARIANT: Only leaf entries are recorded.
        if entry.depth() == 0 || entry.file_type().is_some_and(|kind| kind.is_dir()) {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();

        match fingerprint_file(entry.path()) {
            Ok(state) => {
                files.insert(relative, state);
            }
            Err(err) => match options.policy {
                WalkPolicy::FailClosed => {
                    warn!("cannot fingerprint {:?}: {err}", entry.path().display());
                    return Err(err);
                }
                WalkPolicy::SkipUnreadable => {
                    warn!("skip {:?}: {err}", entry.path().display());
                }
            },
        }
    }

    debug!("fingerprinted {} entries under {:?}", files.len(), root.display());

    Ok(DirectoryState {
        path: root.to_path_buf(),
        exists: true,
        file_count: files.len(),
        modified: metadata.modified().ok(),
        files,
    })
}

/// Compare two directory fingerprints.
///
/// Two absent directories are equal. Otherwise both must record the same
/// relative paths with equal [`FileState`] values.
pub fn directory_states_equal(before: &DirectoryState, after: &DirectoryState) -> bool {
    match (before.exists, after.exists) {
        (false, false) => return true,
        (true, true) => {}
        _ => return false,
    }

    if before.file_count != after.file_count {
        return false;
    }

    before.files.iter().all(|(path, lhs)| {
        after
            .files
            .get(path)
            .is_some_and(|rhs| states_equal(lhs, rhs))
    })
}

/// List relative paths that differ between two directory fingerprints.
///
/// Covers paths that were added, removed, or modified.
pub fn changed_paths(before: &DirectoryState, after: &DirectoryState) -> Vec<PathBuf> {
    let keys = before
        .files
        .keys()
        .chain(after.files.keys())
        .collect::<BTreeSet<_>>();

    keys.into_iter()
        .filter(|path| match (before.files.get(*path), after.files.get(*path)) {
            (Some(lhs), Some(rhs)) => !states_equal(lhs, rhs),
            _ => true,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn populate(root: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(root.join("nvim/lua"))?;
        fs::write(root.join(".bashrc"), "export EDITOR=nvim")?;
        fs::write(root.join("nvim/init.lua"), "require('core')")?;
        fs::write(root.join("nvim/lua/core.lua"), "return {}")?;
        Ok(())
    }

    #[test]
    fn recursive_walk_records_leaves_only() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        populate(dir.path())?;

        let state = fingerprint_directory(dir.path(), true)?;
        let keys = state.files.keys().cloned().collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                PathBuf::from(".bashrc"),
                PathBuf::from("nvim/init.lua"),
                PathBuf::from("nvim/lua/core.lua"),
            ]
        );
        assert_eq!(state.file_count, 3);

        Ok(())
    }

    #[test]
    fn shallow_walk_stays_at_top_level() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        populate(dir.path())?;

        let state = fingerprint_directory(dir.path(), false)?;
        let keys = state.files.keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys, vec![PathBuf::from(".bashrc")]);

        Ok(())
    }

    #[test]
    fn unchanged_tree_is_equal() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        populate(dir.path())?;

        let before = fingerprint_directory(dir.path(), true)?;
        let after = fingerprint_directory(dir.path(), true)?;
        assert!(directory_states_equal(&before, &after));
        assert!(changed_paths(&before, &after).is_empty());

        Ok(())
    }

    #[test]
    fn changes_are_detected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        populate(dir.path())?;
        let before = fingerprint_directory(dir.path(), true)?;

        fs::write(dir.path().join("nvim/init.lua"), "require('plugins')")?;
        fs::remove_file(dir.path().join(".bashrc"))?;
        fs::write(dir.path().join(".zshrc"), "bindkey -v")?;
        let after = fingerprint_directory(dir.path(), true)?;

        assert!(!directory_states_equal(&before, &after));
        assert_eq!(
            changed_paths(&before, &after),
            vec![
                PathBuf::from(".bashrc"),
                PathBuf::from(".zshrc"),
                PathBuf::from("nvim/init.lua"),
            ]
        );

        Ok(())
    }

    #[test]
    fn same_count_different_paths_differ() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a"), "x")?;
        let before = fingerprint_directory(dir.path(), false)?;

        fs::rename(dir.path().join("a"), dir.path().join("b"))?;
        let after = fingerprint_directory(dir.path(), false)?;
        assert_eq!(before.file_count, after.file_count);
        assert!(!directory_states_equal(&before, &after));

        Ok(())
    }

    #[test]
    fn root_must_be_directory() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let file = dir.path().join("file");
        fs::write(&file, "x")?;

        assert!(matches!(
            fingerprint_directory(&file, true),
            Err(FingerprintError::NotADirectory { .. })
        ));
        assert!(matches!(
            fingerprint_directory(dir.path().join("missing"), true),
            Err(FingerprintError::NotFound { .. })
        ));

        Ok(())
    }

    #[test]
    fn absent_directories_are_equal() {
        assert!(directory_states_equal(
            &DirectoryState::absent("/a"),
            &DirectoryState::absent("/b")
        ));
    }

    #[test]
    fn skip_policy_matches_fail_closed_on_readable_tree() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        populate(dir.path())?;

        let strict = fingerprint_directory(dir.path(), true)?;
        let lenient = fingerprint_directory_with(
            dir.path(),
            WalkOptions {
                recursive: true,
                policy: WalkPolicy::SkipUnreadable,
            },
        )?;
        assert!(directory_states_equal(&strict, &lenient));

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_child_fails_closed_unless_skipped() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new()?;
        populate(dir.path())?;
        let locked = dir.path().join("nvim/lua");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;

        // Root reads through any permission bits, so nothing fails there.
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;
            return Ok(());
        }

        let strict = fingerprint_directory(dir.path(), true);
        let lenient = fingerprint_directory_with(
            dir.path(),
            WalkOptions {
                recursive: true,
                policy: WalkPolicy::SkipUnreadable,
            },
        );
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;

        assert!(matches!(strict, Err(FingerprintError::Walk { .. })));

        let lenient = lenient?;
        let keys = lenient.files.keys().cloned().collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![PathBuf::from(".bashrc"), PathBuf::from("nvim/init.lua")]
        );
        assert_eq!(lenient.file_count, 2);

        Ok(())
    }
}
