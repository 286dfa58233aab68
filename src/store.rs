// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup store inspection and restoration.
//!
//! The __backup store__ is the read side of a backup directory. Where the
//! backup engine only ever adds backups, the store enumerates what is there,
//! checks that backups still hold the content they claim to hold, and puts
//! them back where they came from.
//!
//! # Enumeration
//!
//! The ledger is the authoritative catalogue when it exists. Without a ledger,
//! the store falls back to reading every `.meta` sidecar in the directory.
//! Backups found through neither are invisible to the store. Records whose
//! backup file has since been evicted are still listed, so callers should
//! consult [`BackupMetadata::is_present`] before acting on them.
//!
//! # Restoration
//!
//! Restoring decodes the backup into a temporary file next to the destination,
//! checks its SHA-256 against the recorded checksum, applies the recorded
//! permission bits, and only then moves it over the destination. A backup that
//! fails its checksum never touches the destination.

use crate::{
    backup::{
        ledger::BackupIndex,
        sidecar::{is_sidecar, BackupMetadata},
    },
    config::{parse_file_mode, ConfigError},
    fingerprint::{sha256_file, sha256_reader},
};

use flate2::read::GzDecoder;
use std::{
    fs::{self, File},
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

const RESTORE_TMP_SUFFIX: &str = ".dotkeep-restore";

/// Read side of one backup directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupStore {
    directory: PathBuf,
}

impl BackupStore {
    /// Open existing backup directory.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Open`] if directory cannot be inspected.
    /// - Return [`StoreError::NotADirectory`] if path is not a directory.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref();
        let metadata = fs::metadata(directory).map_err(|err| StoreError::Open {
            source: err,
            path: directory.to_path_buf(),
        })?;
        if !metadata.is_dir() {
            return Err(StoreError::NotADirectory {
                path: directory.to_path_buf(),
            });
        }

        Ok(Self {
            directory: directory.to_path_buf(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// List every recorded backup, oldest first.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadDir`] if sidecars must be scanned, but the
    ///   directory cannot be listed.
    pub fn list(&self) -> Result<Vec<BackupMetadata>> {
        if BackupIndex::exists(&self.directory) {
            return Ok(BackupIndex::load(&self.directory).backups);
        }

        debug!(
            "no ledger in {:?}, reading sidecars",
            self.directory.display()
        );
        self.list_sidecars()
    }

    /// List recorded backups of one original file, oldest first.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadDir`] if sidecars cannot be scanned.
    pub fn history(&self, original: impl AsRef<Path>) -> Result<Vec<BackupMetadata>> {
        let original = absolute_or_same(original.as_ref());
        let mut backups = self.list()?;
        backups.retain(|entry| entry.original_path == original);
        Ok(backups)
    }

    /// Most recent backup of one original file that still exists on disk.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadDir`] if sidecars cannot be scanned.
    pub fn latest(&self, original: impl AsRef<Path>) -> Result<Option<BackupMetadata>> {
        Ok(self
            .history(original)?
            .into_iter()
            .rev()
            .find(BackupMetadata::is_present))
    }

    /// Find recorded backup of one original file by its backup path.
    ///
    /// Both paths may be spelled relative to the current directory, or
    /// through symlinks.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadDir`] if sidecars cannot be scanned.
    pub fn find(
        &self,
        original: impl AsRef<Path>,
        backup: impl AsRef<Path>,
    ) -> Result<Option<BackupMetadata>> {
        let backup = resolve_path(backup.as_ref());
        Ok(self
            .history(original)?
            .into_iter()
            .find(|entry| resolve_path(&entry.backup_path) == backup))
    }

    /// Check that backup still decodes to its recorded checksum.
    ///
    /// Undecodable compressed data counts as a failed check rather than an
    /// error.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Missing`] if backup file no longer exists.
    /// - Return [`StoreError::Read`] if backup cannot be read.
    #[instrument(skip(self, metadata), level = "debug")]
    pub fn verify(&self, metadata: &BackupMetadata) -> Result<bool> {
        let reader = open_backup(metadata)?;
        let actual = match sha256_reader(reader) {
            Ok(actual) => actual,
            Err(err) if is_corruption(&err) => {
                warn!(
                    "backup {:?} is corrupt: {err}",
                    metadata.backup_path.display()
                );
                return Ok(false);
            }
            Err(err) => {
                return Err(StoreError::Read {
                    source: err,
                    path: metadata.backup_path.clone(),
                })
            }
        };

        let intact = actual == metadata.checksum;
        debug!(
            "backup {:?} intact: {intact}",
            metadata.backup_path.display()
        );

        Ok(intact)
    }

    /// Restore backup to destination.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Missing`] if backup file no longer exists.
    /// - Return [`StoreError::CreateDir`] if destination parent cannot be
    ///   created.
    /// - Return [`StoreError::Write`] if backup cannot be decoded into place.
    /// - Return [`StoreError::ChecksumMismatch`] if restored content differs
    ///   from the recorded checksum.
    /// - Return [`StoreError::FileMode`] if recorded permission bits are
    ///   invalid.
    /// - Return [`StoreError::Permissions`] if permission bits cannot be
    ///   applied.
    /// - Return [`StoreError::Rename`] if restored file cannot be moved over
    ///   destination.
    #[instrument(skip(self, metadata, destination), level = "debug")]
    pub fn restore(&self, metadata: &BackupMetadata, destination: impl AsRef<Path>) -> Result<()> {
        let destination = destination.as_ref();
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            mkdirp::mkdirp(parent).map_err(|err| StoreError::CreateDir {
                source: err,
                path: parent.to_path_buf(),
            })?;
        }

        let mut staged = destination.as_os_str().to_owned();
        staged.push(RESTORE_TMP_SUFFIX);
        let staged = PathBuf::from(staged);

        let result = stage_restore(metadata, &staged).and_then(|_| {
            fs::rename(&staged, destination).map_err(|err| StoreError::Rename {
                source: err,
                from: staged.clone(),
                to: destination.to_path_buf(),
            })
        });
        if result.is_err() {
            let _ = fs::remove_file(&staged);
        }
        result?;

        info!(
            "restored {:?} to {:?}",
            metadata.backup_path.display(),
            destination.display()
        );

        Ok(())
    }

    fn list_sidecars(&self) -> Result<Vec<BackupMetadata>> {
        let entries = fs::read_dir(&self.directory).map_err(|err| StoreError::ReadDir {
            source: err,
            path: self.directory.clone(),
        })?;

        let mut backups = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|err| StoreError::ReadDir {
                    source: err,
                    path: self.directory.clone(),
                })?
                .path();
            if !is_sidecar(&path) {
                continue;
            }

            match BackupMetadata::read_sidecar(&path) {
                Ok(metadata) => backups.push(metadata),
                Err(err) => warn!("skip unreadable sidecar {:?}: {err}", path.display()),
            }
        }

        backups.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.backup_path.cmp(&b.backup_path))
        });

        Ok(backups)
    }
}

fn stage_restore(metadata: &BackupMetadata, staged: &Path) -> Result<()> {
    let mut reader = open_backup(metadata)?;
    let written = File::create(staged).and_then(|mut file| {
        io::copy(&mut reader, &mut file)?;
        file.sync_all()
    });
    written.map_err(|err| StoreError::Write {
        source: err,
        from: metadata.backup_path.clone(),
        to: staged.to_path_buf(),
    })?;

    let actual = sha256_file(staged).map_err(|err| StoreError::Read {
        source: err,
        path: staged.to_path_buf(),
    })?;
    if actual != metadata.checksum {
        return Err(StoreError::ChecksumMismatch {
            path: metadata.backup_path.clone(),
            expected: metadata.checksum.clone(),
            actual,
        });
    }

    apply_file_mode(staged, &metadata.file_mode)
}

#[cfg(unix)]
fn apply_file_mode(path: &Path, mode: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = parse_file_mode(mode)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|err| {
        StoreError::Permissions {
            source: err,
            path: path.to_path_buf(),
        }
    })
}

#[cfg(not(unix))]
fn apply_file_mode(_path: &Path, mode: &str) -> Result<()> {
    parse_file_mode(mode)?;
    Ok(())
}

fn open_backup(metadata: &BackupMetadata) -> Result<Box<dyn Read>> {
    let path = &metadata.backup_path;
    let file = File::open(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            StoreError::Missing { path: path.clone() }
        } else {
            StoreError::Read {
                source: err,
                path: path.clone(),
            }
        }
    })?;

    let reader = BufReader::new(file);
    if metadata.compressed {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

fn is_corruption(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof
    )
}

fn absolute_or_same(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn resolve_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| absolute_or_same(path))
}

/// Backup store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backup directory cannot be inspected.
    #[error("failed to open backup store {:?}", path.display())]
    Open {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Backup store path is not a directory.
    #[error("backup store {:?} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// Backup directory cannot be listed.
    #[error("failed to read backup store {:?}", path.display())]
    ReadDir {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Recorded backup file no longer exists.
    #[error("backup {:?} no longer exists", path.display())]
    Missing { path: PathBuf },

    /// Backup cannot be read.
    #[error("failed to read backup {:?}", path.display())]
    Read {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Destination parent directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Backup cannot be decoded into place.
    #[error("failed to restore {:?} to {:?}", from.display(), to.display())]
    Write {
        #[source]
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Restored content does not match recorded checksum.
    #[error(
        "backup {:?} failed checksum: expected {expected}, found {actual}",
        path.display()
    )]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Recorded permission bits are invalid.
    #[error(transparent)]
    FileMode(#[from] ConfigError),

    /// Permission bits cannot be applied.
    #[error("failed to set permissions of {:?}", path.display())]
    Permissions {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Restored file cannot replace destination.
    #[error("failed to move {:?} to {:?}", from.display(), to.display())]
    Rename {
        #[source]
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
