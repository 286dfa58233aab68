// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup metadata sidecars.
//!
//! A __sidecar__ is a small JSON document written next to a backup, named
//! after the backup with an extra `.meta` suffix. It records where the backup
//! came from and how to check it, separately from the backup's own bytes. The
//! same record shape is used for each ledger entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Suffix appended to a backup path to name its sidecar.
pub const SIDECAR_SUFFIX: &str = ".meta";

/// Record describing one backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Absolute path of the file that was backed up.
    pub original_path: PathBuf,

    /// Path of the backup file.
    pub backup_path: PathBuf,

    /// Time the backup was taken.
    pub timestamp: DateTime<Utc>,

    /// Hex encoded SHA-256 of the original content.
    pub checksum: String,

    /// Backup is gzip compressed.
    pub compressed: bool,

    /// Size of the original file in bytes.
    pub original_size: u64,

    /// Size of the backup file in bytes.
    pub backup_size: u64,

    /// Permission bits of the original file as octal text.
    pub file_mode: String,
}

impl BackupMetadata {
    /// Path of the sidecar belonging to this backup.
    pub fn sidecar_path(&self) -> PathBuf {
        sidecar_path_for(&self.backup_path)
    }

    /// Write record as indented JSON next to its backup.
    ///
    /// # Errors
    ///
    /// - Return [`SidecarError::Serialize`] if record cannot be serialized.
    /// - Return [`SidecarError::Write`] if sidecar cannot be written.
    pub fn write_sidecar(&self) -> Result<PathBuf> {
        let sidecar = self.sidecar_path();
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(&sidecar, data).map_err(|err| SidecarError::Write {
            source: err,
            path: sidecar.clone(),
        })?;

        Ok(sidecar)
    }

    /// Read record from a sidecar file.
    ///
    /// # Errors
    ///
    /// - Return [`SidecarError::Read`] if sidecar cannot be read.
    /// - Return [`SidecarError::Parse`] if sidecar is not a valid record.
    pub fn read_sidecar(sidecar: impl AsRef<Path>) -> Result<Self> {
        let sidecar = sidecar.as_ref();
        let data = fs::read(sidecar).map_err(|err| SidecarError::Read {
            source: err,
            path: sidecar.to_path_buf(),
        })?;

        serde_json::from_slice(&data).map_err(|err| SidecarError::Parse {
            source: err,
            path: sidecar.to_path_buf(),
        })
    }

    /// Backup file still exists on disk.
    pub fn is_present(&self) -> bool {
        self.backup_path.is_file()
    }
}

/// Determine sidecar path for a backup path.
pub fn sidecar_path_for(backup: impl AsRef<Path>) -> PathBuf {
    let mut raw = backup.as_ref().as_os_str().to_owned();
    raw.push(SIDECAR_SUFFIX);
    PathBuf::from(raw)
}

/// Path names a sidecar rather than a backup.
pub fn is_sidecar(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(SIDECAR_SUFFIX))
}

/// Sidecar error types.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    /// Record cannot be serialized.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// Sidecar cannot be written.
    #[error("failed to write sidecar {:?}", path.display())]
    Write {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Sidecar cannot be read.
    #[error("failed to read sidecar {:?}", path.display())]
    Read {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Sidecar content is not a valid record.
    #[error("failed to parse sidecar {:?}", path.display())]
    Parse {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = SidecarError> = std::result::Result<T, E>;
