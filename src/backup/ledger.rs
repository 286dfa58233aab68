// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup ledger.
//!
//! The __ledger__ is a single JSON file per backup directory, named
//! `.backup_index.json`, that records every backup ever created in that
//! directory across all source files that share it. It backs incremental
//! deduplication and backup enumeration.
//!
//! # Loading
//!
//! Loading never fails. A missing ledger is an empty ledger, and so is a
//! corrupt one. Losing dedup history only means the next backup runs
//! unconditionally.
//!
//! # Writing
//!
//! Writing is "read whole, append, write whole". The new content is first
//! written to a uniquely named `.backup_index.json.<random>.tmp` file in the
//! same directory, then renamed over the ledger, so readers never see a torn
//! file.
//!
//! # Locking Contract
//!
//! No two ledger writes for the same directory may interleave. Every
//! load-append-write cycle must run inside [`with_directory_lock`] for the
//! ledger's directory. The backup engine holds this lock from its dedup check
//! through retention, which also keeps the numbered format from reusing a
//! counter that retention just freed. Locks are keyed by the canonical path
//! of the directory, so every spelling of one directory shares one lock. The
//! lock is process wide. It does not guard against other processes.

use crate::backup::sidecar::BackupMetadata;

use chrono::{DateTime, Utc};
use parking_lot::{const_mutex, Mutex};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};

/// File name of the ledger inside a backup directory.
pub const INDEX_FILE_NAME: &str = ".backup_index.json";

const INDEX_TMP_PREFIX: &str = ".backup_index.json.";
const INDEX_TMP_SUFFIX: &str = ".tmp";

// INVARIANT: Entries only live while some caller holds or waits on them.
static DIRECTORY_LOCKS: Mutex<BTreeMap<PathBuf, Arc<Mutex<()>>>> = const_mutex(BTreeMap::new());

/// Run closure while holding the lock of a backup directory.
///
/// Calls for the same directory within this process are serialized, no matter
/// how the directory path is spelled. Calls for different directories run
/// independently. A directory that does not exist yet is keyed by its absolute
/// path instead of its canonical one.
pub fn with_directory_lock<T>(directory: impl AsRef<Path>, critical: impl FnOnce() -> T) -> T {
    let key = lock_key(directory.as_ref());
    let lock = {
        let mut locks = DIRECTORY_LOCKS.lock();
        Arc::clone(locks.entry(key.clone()).or_default())
    };

    let result = {
        let _guard = lock.lock();
        critical()
    };

    // INVARIANT: Clones are only taken under registry lock, so a count of two
    // means nobody but the registry and this call knows about the entry.
    let mut locks = DIRECTORY_LOCKS.lock();
    if Arc::strong_count(&lock) == 2 {
        locks.remove(&key);
    }

    result
}

/// Registry key of a backup directory.
pub(crate) fn lock_key(directory: &Path) -> PathBuf {
    fs::canonicalize(directory)
        .or_else(|_| std::path::absolute(directory))
        .unwrap_or_else(|_| directory.to_path_buf())
}

/// Durable catalogue of all backups in one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupIndex {
    /// Time of the last append.
    pub last_updated: DateTime<Utc>,

    /// Every backup recorded, oldest first.
    pub backups: Vec<BackupMetadata>,
}

impl Default for BackupIndex {
    fn default() -> Self {
        Self {
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
            backups: Vec::new(),
        }
    }
}

impl BackupIndex {
    /// Path of the ledger for a backup directory.
    pub fn index_path(directory: impl AsRef<Path>) -> PathBuf {
        directory.as_ref().join(INDEX_FILE_NAME)
    }

    /// Ledger file exists in backup directory.
    pub fn exists(directory: impl AsRef<Path>) -> bool {
        Self::index_path(directory).is_file()
    }

    /// Load ledger of a backup directory.
    ///
    /// Missing or unreadable ledgers yield an empty ledger.
    pub fn load(directory: impl AsRef<Path>) -> Self {
        let path = Self::index_path(directory);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("no ledger at {:?}", path.display());
                return Self::default();
            }
            Err(err) => {
                warn!("cannot read ledger {:?}, starting empty: {err}", path.display());
                return Self::default();
            }
        };

        match serde_json::from_slice(&data) {
            Ok(index) => index,
            Err(err) => {
                warn!("corrupt ledger {:?}, starting empty: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Rewrite ledger of a backup directory in full.
    ///
    /// # Errors
    ///
    /// - Return [`LedgerError::Serialize`] if ledger cannot be serialized.
    /// - Return [`LedgerError::Write`] if temporary ledger cannot be written.
    /// - Return [`LedgerError::Rename`] if temporary ledger cannot replace
    ///   the current one.
    pub fn save(&self, directory: impl AsRef<Path>) -> Result<()> {
        let directory = directory.as_ref();
        let path = Self::index_path(directory);

        let data = serde_json::to_vec_pretty(self)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(INDEX_TMP_PREFIX)
            .suffix(INDEX_TMP_SUFFIX)
            .tempfile_in(directory)
            .map_err(|err| LedgerError::Write {
                source: err,
                path: directory.to_path_buf(),
            })?;
        tmp.write_all(&data)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|err| LedgerError::Write {
                source: err,
                path: tmp.path().to_path_buf(),
            })?;

        let from = tmp.path().to_path_buf();
        tmp.persist(&path).map_err(|err| LedgerError::Rename {
            source: err.error,
            from,
            to: path.clone(),
        })?;

        debug!(
            "ledger {:?} now holds {} entries",
            path.display(),
            self.backups.len()
        );

        Ok(())
    }

    /// Record new backup, and bump last updated time.
    pub fn append(&mut self, metadata: BackupMetadata) {
        self.last_updated = Utc::now();
        self.backups.push(metadata);
    }

    /// Find recorded backup of the same original path with the same content.
    ///
    /// Entries whose backup file no longer exists are ignored, so content
    /// that retention evicted is backed up again.
    pub fn find_duplicate(
        &self,
        original_path: impl AsRef<Path>,
        checksum: impl AsRef<str>,
    ) -> Option<&BackupMetadata> {
        self.backups.iter().rev().find(|entry| {
            entry.original_path == original_path.as_ref()
                && entry.checksum == checksum.as_ref()
                && entry.is_present()
        })
    }

    /// All recorded backups of one original path, oldest first.
    pub fn history<'a>(
        &'a self,
        original_path: &'a Path,
    ) -> impl Iterator<Item = &'a BackupMetadata> + 'a {
        self.backups
            .iter()
            .filter(move |entry| entry.original_path == original_path)
    }
}

/// Ledger error types.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Ledger cannot be serialized.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// Temporary ledger cannot be written.
    #[error("failed to write ledger {:?}", path.display())]
    Write {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Temporary ledger cannot replace current ledger.
    #[error("failed to move ledger {:?} to {:?}", from.display(), to.display())]
    Rename {
        #[source]
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
