// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup engine.
//!
//! Protect a file before it gets overwritten by producing a versioned,
//! optionally compressed copy of it inside a backup directory.
//!
//! # Backup Pipeline
//!
//! Given a source file and an [`EnhancedBackupConfig`], a backup runs through
//! the following steps:
//!
//! 1. Return nothing if backups are disabled.
//! 2. Validate configuration before any I/O.
//! 3. Create the backup directory if needed, then take its lock.
//! 4. Skip the backup if incremental mode is on and the ledger already holds
//!    a backup of the same original path with the same content hash.
//! 5. Name the backup through the configured [`BackupFormat`].
//! 6. Copy the source, or stream it through gzip.
//! 7. Write the `.meta` sidecar and append to the ledger when asked to.
//! 8. Trim old backups of the same source file when `max_backups` is set.
//!
//! Dry runs walk the same pipeline without touching the file system, and
//! report a plausible but non-existent backup path.
//!
//! # Backup Directory Layout
//!
//! ```text
//! <dir>/
//!   <name>.backup.<timestamp|NNN|hash8>[.gz]
//!   <name>.backup.<...>.meta
//!   .backup_index.json
//! ```
//!
//! # See Also
//!
//! 1. [`naming`]
//! 2. [`ledger`]
//! 3. [`retention`]

pub mod ledger;
pub mod naming;
pub mod retention;
pub mod sidecar;

use crate::{
    backup::{
        ledger::{with_directory_lock, BackupIndex},
        naming::{backup_file_name, with_compression_suffix},
        retention::enforce_retention_unlocked,
        sidecar::BackupMetadata,
    },
    config::{format_file_mode, BackupFormat, ConflictAction, EnhancedBackupConfig},
    fingerprint::{permission_bits, sha256_file},
};

use chrono::{DateTime, Local, Utc};
use flate2::{write::GzEncoder, Compression};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufReader},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Checksum reported by dry runs.
pub const DRY_RUN_CHECKSUM: &str = "dry-run";

/// Structured outcome of one backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupResult {
    /// Path of the backup file.
    pub backup_path: PathBuf,

    /// Absolute path of the file that was backed up.
    pub original_path: PathBuf,

    /// Size of the backup file in bytes.
    pub size: u64,

    /// Hex encoded SHA-256 of the original content.
    pub checksum: String,

    /// Time the backup was taken.
    pub created_at: DateTime<Utc>,

    /// Backup is gzip compressed.
    pub compressed: bool,

    /// Result was simulated.
    pub dry_run: bool,

    /// Caller supplied tags from configuration.
    pub tags: BTreeMap<String, String>,
}

/// Back up a source file according to configuration.
///
/// Returns `None` when backups are disabled, or when incremental mode found
/// identical content already backed up for the same source path.
///
/// # Errors
///
/// - Return [`BackupError::Config`] if configuration is invalid.
/// - Return [`BackupError::Stat`] if source file cannot be inspected.
/// - Return [`BackupError::NotAFile`] if source is not a regular file.
/// - Return [`BackupError::CreateDir`] if backup directory cannot be created.
/// - Return [`BackupError::Checksum`] if source content cannot be hashed.
/// - Return [`BackupError::Write`] if backup cannot be written.
/// - Return [`BackupError::Sidecar`] or [`BackupError::Ledger`] if
///   bookkeeping fails.
/// - Return [`BackupError::Retention`] if old backups cannot be evicted. The
///   new backup exists at that point.
#[instrument(skip(source, config), level = "debug")]
pub fn create_backup(
    source: impl AsRef<Path>,
    config: &EnhancedBackupConfig,
) -> Result<Option<BackupResult>> {
    let source = source.as_ref();
    if !config.enabled {
        debug!("backups disabled, skip {:?}", source.display());
        return Ok(None);
    }

    config.validate()?;

    if config.dry_run {
        return Ok(simulate_backup(source, config));
    }

    let source = std::path::absolute(source).map_err(|err| BackupError::Stat {
        source: err,
        path: source.to_path_buf(),
    })?;
    let metadata = fs::metadata(&source).map_err(|err| BackupError::Stat {
        source: err,
        path: source.clone(),
    })?;
    if !metadata.is_file() {
        return Err(BackupError::NotAFile { path: source });
    }

    mkdirp::mkdirp(&config.directory).map_err(|err| BackupError::CreateDir {
        source: err,
        path: config.directory.clone(),
    })?;

    with_directory_lock(&config.directory, || {
        backup_locked(&source, &metadata, config)
    })
}

fn backup_locked(
    source: &Path,
    metadata: &fs::Metadata,
    config: &EnhancedBackupConfig,
) -> Result<Option<BackupResult>> {
    let basename = basename_of(source)?;
    let checksum = sha256_file(source).map_err(|err| BackupError::Checksum {
        source: err,
        path: source.to_path_buf(),
    })?;

    if config.incremental && BackupIndex::exists(&config.directory) {
        let index = BackupIndex::load(&config.directory);
        if let Some(previous) = index.find_duplicate(source, &checksum) {
            info!(
                source = ?source,
                backup = ?previous.backup_path,
                "skip backup, content unchanged"
            );
            return Ok(None);
        }
    }

    let now = Local::now();
    let name = backup_file_name(
        config.backup_format,
        &basename,
        &config.directory,
        &checksum,
        now,
    )
    .map_err(|err| BackupError::Naming {
        source: err,
        path: config.directory.clone(),
    })?;
    let backup_path = with_compression_suffix(config.directory.join(name), config.compression);

    write_backup(source, &backup_path, metadata, config.compression)?;
    let backup_size = fs::metadata(&backup_path)
        .map_err(|err| BackupError::Stat {
            source: err,
            path: backup_path.clone(),
        })?
        .len();

    let record = BackupMetadata {
        original_path: source.to_path_buf(),
        backup_path: backup_path.clone(),
        timestamp: now.with_timezone(&Utc),
        checksum: checksum.clone(),
        compressed: config.compression,
        original_size: metadata.len(),
        backup_size,
        file_mode: format_file_mode(permission_bits(metadata)),
    };

    if config.backup_metadata {
        record.write_sidecar()?;
    }

    if config.backup_index {
        let mut index = BackupIndex::load(&config.directory);
        index.append(record.clone());
        index.save(&config.directory)?;
    }

    info!(
        "backed up {:?} to {:?}",
        source.display(),
        backup_path.display()
    );

    if config.max_backups > 0 {
        enforce_retention_unlocked(source, config)?;
    }

    Ok(Some(BackupResult {
        backup_path,
        original_path: record.original_path,
        size: backup_size,
        checksum,
        created_at: record.timestamp,
        compressed: config.compression,
        dry_run: false,
        tags: config.tags.clone(),
    }))
}

fn write_backup(
    source: &Path,
    destination: &Path,
    metadata: &fs::Metadata,
    compress: bool,
) -> Result<()> {
    let written = if compress {
        compress_file(source, destination, metadata.permissions())
    } else {
        fs::copy(source, destination).map(|_| ())
    };

    written.map_err(|err| {
        // Partial backups must never linger.
        let _ = fs::remove_file(destination);
        BackupError::Write {
            source: err,
            from: source.to_path_buf(),
            to: destination.to_path_buf(),
        }
    })
}

// INVARIANT: Compressed backups carry the same permission bits as the source,
// just like plain copies do.
fn compress_file(
    source: &Path,
    destination: &Path,
    permissions: fs::Permissions,
) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(source)?);
    let mut encoder = GzEncoder::new(File::create(destination)?, Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    let file = encoder.finish()?;
    file.set_permissions(permissions)?;
    file.sync_all()?;
    Ok(())
}

fn simulate_backup(source: &Path, config: &EnhancedBackupConfig) -> Option<BackupResult> {
    let basename = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".into());

    // Unreadable sources simply are not deduplicated, nor content addressed.
    let hash = sha256_file(source).ok();
    if config.incremental && BackupIndex::exists(&config.directory) {
        if let Some(hash) = &hash {
            let original = std::path::absolute(source).unwrap_or_else(|_| source.to_path_buf());
            let index = BackupIndex::load(&config.directory);
            if let Some(previous) = index.find_duplicate(&original, hash) {
                info!(
                    source = ?source,
                    backup = ?previous.backup_path,
                    "dry run: would skip backup, content unchanged"
                );
                return None;
            }
        }
    }

    let checksum = match config.backup_format {
        BackupFormat::GitStyle => hash.unwrap_or_else(|| DRY_RUN_CHECKSUM.into()),
        _ => DRY_RUN_CHECKSUM.into(),
    };

    let now = Local::now();
    let name = backup_file_name(
        config.backup_format,
        &basename,
        &config.directory,
        &checksum,
        now,
    )
    .unwrap_or_else(|_| format!("{basename}.backup.{DRY_RUN_CHECKSUM}"));
    let backup_path = with_compression_suffix(config.directory.join(name), config.compression);

    info!(
        "dry run: would back up {:?} to {:?}",
        source.display(),
        backup_path.display()
    );

    Some(BackupResult {
        backup_path,
        original_path: source.to_path_buf(),
        size: 0,
        checksum: DRY_RUN_CHECKSUM.into(),
        created_at: now.with_timezone(&Utc),
        compressed: config.compression,
        dry_run: true,
        tags: config.tags.clone(),
    })
}

fn basename_of(source: &Path) -> Result<String> {
    source
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| BackupError::InvalidSource {
            path: source.to_path_buf(),
        })
}

/// Decision made when a target path already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictResolution {
    /// Action that was applied.
    pub action: ConflictAction,

    /// Backup taken of the existing target, if any.
    pub backup_path: Option<PathBuf>,

    /// Caller may go on and write the target.
    pub proceed: bool,
}

/// Resolve a write to a target path that may already exist.
///
/// A missing target is no conflict, so the caller may proceed. Otherwise
/// [`ConflictAction::Backup`] backs up the target first,
/// [`ConflictAction::Overwrite`] proceeds as is, and [`ConflictAction::Skip`]
/// tells the caller to leave the target alone.
///
/// # Errors
///
/// - Return any [`BackupError`] raised while backing up the target.
#[instrument(skip(target, config), level = "debug")]
pub fn resolve_conflict(
    target: impl AsRef<Path>,
    action: ConflictAction,
    config: &EnhancedBackupConfig,
) -> Result<ConflictResolution> {
    let target = target.as_ref();
    if fs::symlink_metadata(target).is_err() {
        debug!("no conflict at {:?}", target.display());
        return Ok(ConflictResolution {
            action,
            backup_path: None,
            proceed: true,
        });
    }

    let resolution = match action {
        ConflictAction::Backup => ConflictResolution {
            action,
            backup_path: create_backup(target, config)?.map(|result| result.backup_path),
            proceed: true,
        },
        ConflictAction::Overwrite => ConflictResolution {
            action,
            backup_path: None,
            proceed: true,
        },
        ConflictAction::Skip => ConflictResolution {
            action,
            backup_path: None,
            proceed: false,
        },
    };

    info!(
        "conflict at {:?} resolved by {action}",
        target.display()
    );

    Ok(resolution)
}

/// Backup error types.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Source path has no usable file name.
    #[error("source path {:?} has no file name", path.display())]
    InvalidSource { path: PathBuf },

    /// Source is not a regular file.
    #[error("source path {:?} is not a regular file", path.display())]
    NotAFile { path: PathBuf },

    /// Path cannot be inspected.
    #[error("failed to stat {:?}", path.display())]
    Stat {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Backup directory cannot be created.
    #[error("failed to create backup directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Source content cannot be hashed.
    #[error("failed to compute checksum of {:?}", path.display())]
    Checksum {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Backup directory cannot be scanned for a name.
    #[error("failed to name backup in {:?}", path.display())]
    Naming {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Backup cannot be written.
    #[error("failed to back up {:?} to {:?}", from.display(), to.display())]
    Write {
        #[source]
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Sidecar cannot be written.
    #[error(transparent)]
    Sidecar(#[from] crate::backup::sidecar::SidecarError),

    /// Ledger cannot be written.
    #[error(transparent)]
    Ledger(#[from] crate::backup::ledger::LedgerError),

    /// Old backups cannot be evicted.
    #[error(transparent)]
    Retention(#[from] crate::backup::retention::RetentionError),
}

/// Friendly result alias :3
pub type Result<T, E = BackupError> = std::result::Result<T, E>;
