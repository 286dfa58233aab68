// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! File system fingerprinting.
//!
//! A __fingerprint__ is a snapshot of a path that captures enough information
//! to detect change: existence, size, modification time, permission bits,
//! content hash, and symlink target. Fingerprints are cheap values that are
//! never persisted on their own. They are taken on demand so that the backup
//! engine can tell whether content changed, and so that mutating operations
//! can tell whether they did anything at all.
//!
//! # Hashing Rules
//!
//! Only regular files are hashed. Directories report a zero size and no hash.
//! Symlinks are never followed. Instead, the link target itself is recorded,
//! and two symlinks compare by target string alone. Thus, two links pointing
//! at byte-identical files are still different fingerprints if their targets
//! differ.
//!
//! # See Also
//!
//! 1. [`walk`] for directory tree fingerprints.

pub mod walk;

use sha2::{Digest, Sha256};
use std::{
    fs::{self, File, Metadata},
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{debug, instrument};

/// Fingerprint of one file, symlink, or directory at an instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    /// Path that was fingerprinted.
    pub path: PathBuf,

    /// Path existed when fingerprinted.
    pub exists: bool,

    /// Size in bytes. Zero for directories.
    pub size: u64,

    /// Last modification time, if the platform reports one.
    pub modified: Option<SystemTime>,

    /// Permission bits.
    pub mode: u32,

    /// Hex encoded SHA-256 of content. Regular files only.
    pub hash: Option<String>,

    /// Path is a directory.
    pub is_dir: bool,

    /// Path is a symlink.
    pub is_symlink: bool,

    /// Raw target of symlink.
    pub symlink_target: Option<PathBuf>,
}

impl FileState {
    /// Construct fingerprint of a path that does not exist.
    pub fn absent(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            exists: false,
            size: 0,
            modified: None,
            mode: 0,
            hash: None,
            is_dir: false,
            is_symlink: false,
            symlink_target: None,
        }
    }

    /// Fingerprint describes an existing regular file.
    pub fn is_file(&self) -> bool {
        self.exists && !self.is_dir && !self.is_symlink
    }
}

/// Fingerprint a single path without following symlinks.
///
/// # Errors
///
/// - Return [`FingerprintError::NotFound`] if path does not exist.
/// - Return [`FingerprintError::Stat`] if path cannot be inspected.
/// - Return [`FingerprintError::ReadLink`] if symlink target cannot be read.
/// - Return [`FingerprintError::Hash`] if file content cannot be hashed.
#[instrument(skip(path), level = "debug")]
pub fn fingerprint_file(path: impl AsRef<Path>) -> Result<FileState> {
    let path = path.as_ref();
    let metadata = fs::symlink_metadata(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            FingerprintError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            FingerprintError::Stat {
                source: err,
                path: path.to_path_buf(),
            }
        }
    })?;

    let mut state = FileState {
        path: path.to_path_buf(),
        exists: true,
        size: 0,
        modified: metadata.modified().ok(),
        mode: permission_bits(&metadata),
        hash: None,
        is_dir: false,
        is_symlink: false,
        symlink_target: None,
    };

    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|err| FingerprintError::ReadLink {
            source: err,
            path: path.to_path_buf(),
        })?;
        state.is_symlink = true;
        state.size = metadata.len();
        state.symlink_target = Some(target);
    } else if file_type.is_dir() {
        state.is_dir = true;
    } else {
        state.size = metadata.len();

        // INVARIANT: Never read from fifos, sockets, or devices.
        if file_type.is_file() {
            state.hash = Some(sha256_file(path).map_err(|err| FingerprintError::Hash {
                source: err,
                path: path.to_path_buf(),
            })?);
        }
    }

    debug!("fingerprinted {:?}", path.display());

    Ok(state)
}

/// Compare two file fingerprints.
///
/// Two absent states are equal. Symlinks are equal only to symlinks with the
/// same target. Directories are equal when their permission bits match.
/// Regular files must agree on size and permission bits, and then on content
/// hash. If either side lacks a hash, modification time is compared instead.
pub fn states_equal(before: &FileState, after: &FileState) -> bool {
    match (before.exists, after.exists) {
        (false, false) => return true,
        (true, true) => {}
        _ => return false,
    }

    if before.is_symlink || after.is_symlink {
        return before.is_symlink
            && after.is_symlink
            && before.symlink_target == after.symlink_target;
    }

    if before.is_dir || after.is_dir {
        return before.is_dir && after.is_dir && before.mode == after.mode;
    }

    if before.size != after.size || before.mode != after.mode {
        return false;
    }

    match (&before.hash, &after.hash) {
        (Some(lhs), Some(rhs)) => lhs == rhs,
        _ => before.modified == after.modified,
    }
}

/// Compute hex encoded SHA-256 of file content.
///
/// # Errors
///
/// - Return [`std::io::Error`] if file cannot be opened or read.
pub fn sha256_file(path: impl AsRef<Path>) -> io::Result<String> {
    let file = File::open(path.as_ref())?;
    sha256_reader(BufReader::new(file))
}

/// Compute hex encoded SHA-256 of everything a reader yields.
///
/// # Errors
///
/// - Return [`std::io::Error`] if reader fails.
pub fn sha256_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(unix)]
pub(crate) fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub(crate) fn permission_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Fingerprinting error types.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// Path does not exist.
    #[error("path {:?} does not exist", path.display())]
    NotFound { path: PathBuf },

    /// Path metadata cannot be read.
    #[error("failed to stat {:?}", path.display())]
    Stat {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Symlink target cannot be read.
    #[error("failed to read symlink {:?}", path.display())]
    ReadLink {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// File content cannot be hashed.
    #[error("failed to hash {:?}", path.display())]
    Hash {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Path exists, but is not a directory.
    #[error("path {:?} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// Directory walk failed part way through.
    #[error("failed to walk directory {:?}", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },
}

impl FingerprintError {
    /// Error signals absence rather than failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Friendly result alias :3
pub type Result<T, E = FingerprintError> = std::result::Result<T, E>;
