// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Retention enforcement.
//!
//! Bound the number of backups kept for one source file. A source file's
//! __backup family__ is every entry in the backup directory whose name matches
//! `<basename>.backup.*`, sidecars excluded. When the family grows past
//! `max_backups`, the oldest members by modification time are deleted along
//! with their sidecars until exactly `max_backups` remain.
//!
//! Only the count limit is enforced. Age and tiered limits in
//! [`RetentionPolicy`](crate::config::RetentionPolicy) are accepted, but inert.

use crate::{
    backup::{
        ledger::with_directory_lock,
        naming::BACKUP_INFIX,
        sidecar::{is_sidecar, sidecar_path_for},
    },
    config::EnhancedBackupConfig,
};

use glob::Pattern;
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{debug, info, instrument};

/// Outcome of a retention pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    /// Number of backups left in the family.
    pub retained: usize,

    /// Backups that were deleted, oldest first.
    pub removed: Vec<PathBuf>,
}

/// Trim backup family of a source file down to `max_backups`.
///
/// Takes the backup directory's lock for the whole pass. A `max_backups` of
/// zero keeps everything.
///
/// # Errors
///
/// - Return [`RetentionError::InvalidSource`] if source path has no file name.
/// - Return [`RetentionError::ReadDir`] if backup directory cannot be listed.
/// - Return [`RetentionError::Remove`] if an old backup cannot be deleted.
pub fn enforce_retention(
    source: impl AsRef<Path>,
    config: &EnhancedBackupConfig,
) -> Result<RetentionReport> {
    with_directory_lock(&config.directory, || {
        enforce_retention_unlocked(source.as_ref(), config)
    })
}

/// Retention pass for callers that already hold the directory lock.
#[instrument(skip(source, config), level = "debug")]
pub(crate) fn enforce_retention_unlocked(
    source: &Path,
    config: &EnhancedBackupConfig,
) -> Result<RetentionReport> {
    let limit = config.max_backups as usize;
    if limit == 0 {
        return Ok(RetentionReport::default());
    }

    if config.retention().has_inert_rules() {
        debug!("age and tiered retention rules are carried, but not enforced");
    }

    let mut family = backup_family(source, &config.directory)?;
    if family.len() <= limit {
        return Ok(RetentionReport {
            retained: family.len(),
            removed: Vec::new(),
        });
    }

    // INVARIANT: Oldest first, ties broken by name.
    family.sort();

    let excess = family.len() - limit;
    let mut removed = Vec::with_capacity(excess);
    for (_, path) in family.drain(..excess) {
        fs::remove_file(&path).map_err(|err| RetentionError::Remove {
            source: err,
            path: path.clone(),
        })?;

        // Sidecar removal is best effort.
        let _ = fs::remove_file(sidecar_path_for(&path));

        info!("evicted old backup {:?}", path.display());
        removed.push(path);
    }

    Ok(RetentionReport {
        retained: family.len(),
        removed,
    })
}

fn backup_family(source: &Path, directory: &Path) -> Result<Vec<(SystemTime, PathBuf)>> {
    let basename = source
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| RetentionError::InvalidSource {
            path: source.to_path_buf(),
        })?;
    let pattern = Pattern::new(&format!("{}{BACKUP_INFIX}*", Pattern::escape(basename)))?;

    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(RetentionError::ReadDir {
                source: err,
                path: directory.to_path_buf(),
            })
        }
    };

    let mut family = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| RetentionError::ReadDir {
            source: err,
            path: directory.to_path_buf(),
        })?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };

        if !pattern.matches(&name) || is_sidecar(&path) {
            continue;
        }

        let metadata = entry.metadata().map_err(|err| RetentionError::Stat {
            source: err,
            path: path.clone(),
        })?;
        if !metadata.is_file() {
            continue;
        }

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        family.push((modified, path));
    }

    Ok(family)
}

/// Retention error types.
#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    /// Source path has no usable file name.
    #[error("source path {:?} has no file name", path.display())]
    InvalidSource { path: PathBuf },

    /// Backup family pattern cannot be built.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Backup directory cannot be listed.
    #[error("failed to read backup directory {:?}", path.display())]
    ReadDir {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Backup metadata cannot be read.
    #[error("failed to stat backup {:?}", path.display())]
    Stat {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Old backup cannot be deleted.
    #[error("failed to remove old backup {:?}", path.display())]
    Remove {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = RetentionError> = std::result::Result<T, E>;
