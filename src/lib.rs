// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Versioned backups and change detection for configuration files.
//!
//! Dotkeep protects configuration files before they get overwritten. Each
//! backup is a versioned, optionally compressed copy kept in a __backup
//! directory__, next to an optional metadata sidecar and an optional ledger
//! that catalogues every backup ever taken there.
//!
//! Alongside backups, dotkeep fingerprints files and directory trees so that
//! any mutating operation can tell whether it actually changed anything.
//!
//! # Modules
//!
//! 1. [`config`] for backup policy.
//! 2. [`fingerprint`] for file and directory snapshots.
//! 3. [`backup`] for creating backups and resolving conflicts.
//! 4. [`store`] for listing, verifying, and restoring backups.
//! 5. [`idempotent`] for change tracking around operations.

pub mod backup;
pub mod config;
pub mod fingerprint;
pub mod idempotent;
pub mod path;
pub mod store;

pub use backup::{create_backup, resolve_conflict, BackupResult, ConflictResolution};
pub use config::{BackupFormat, ConflictAction, EnhancedBackupConfig};
pub use fingerprint::{fingerprint_file, states_equal, FileState};
pub use idempotent::{with_directory_idempotency_check, with_idempotency_check};
pub use store::BackupStore;
