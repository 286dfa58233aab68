// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the backup configuration that Dotkeep consumes to
//! simplify the process of serialization and deserialization. File I/O is left
//! to the caller to figure out.
//!
//! # General Layout
//!
//! A backup configuration is a flat TOML table. Every key is optional, and
//! missing keys fall back to their defaults:
//!
//! ```toml
//! enabled = true
//! directory = "~/.local/share/dotkeep/backups"
//! retention_policy = "30d"
//! compression = true
//! incremental = true
//! max_backups = 5
//! backup_format = "numbered"
//! backup_metadata = true
//! backup_index = true
//!
//! [tags]
//! host = "laptop"
//! ```
//!
//! Only `max_backups` drives eviction. The age based `retention_policy` and
//! the tiered `keep_daily`, `keep_weekly`, and `keep_monthly` keys are parsed
//! and validated, but carried as inert configuration.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

/// Permission bits used when a mode string is left empty.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Caller supplied policy for one backup operation.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnhancedBackupConfig {
    /// Backups are opt-in per call.
    pub enabled: bool,

    /// Directory that houses backups, sidecars, and the ledger.
    pub directory: PathBuf,

    /// Maximum age of a backup, e.g., "30d".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_policy: Option<RetentionPeriod>,

    /// Number of daily backups to keep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_daily: Option<u32>,

    /// Number of weekly backups to keep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_weekly: Option<u32>,

    /// Number of monthly backups to keep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_monthly: Option<u32>,

    /// Stream backups through gzip.
    pub compression: bool,

    /// Skip backups whose content is already recorded in the ledger.
    pub incremental: bool,

    /// Number of backups to keep per source file. Zero keeps everything.
    pub max_backups: u32,

    /// Naming strategy for backup files.
    pub backup_format: BackupFormat,

    /// Write a `.meta` sidecar next to each backup.
    pub backup_metadata: bool,

    /// Record each backup in the directory ledger.
    pub backup_index: bool,

    /// Simulate every step without touching the file system.
    pub dry_run: bool,

    /// Free-form tags echoed back in each backup result.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl EnhancedBackupConfig {
    /// Construct enabled configuration targeting a backup directory.
    ///
    /// Every other option takes its default value.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// Check configuration for errors that must be caught before any I/O.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingDirectory`] if backups are enabled
    ///   without a target directory.
    /// - Return [`ConfigError::RetentionPolicy`] if the retention period is
    ///   zero.
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingDirectory);
        }

        if let Some(period) = &self.retention_policy {
            if period.amount == 0 {
                return Err(ConfigError::RetentionPolicy {
                    value: period.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Retention rules carried by this configuration.
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_count: self.max_backups,
            max_age: self.retention_policy,
            keep_daily: self.keep_daily,
            keep_weekly: self.keep_weekly,
            keep_monthly: self.keep_monthly,
        }
    }
}

impl FromStr for EnhancedBackupConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: EnhancedBackupConfig =
            toml::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on backup directory field.
        if !config.directory.as_os_str().is_empty() {
            config.directory = PathBuf::from(
                shellexpand::full(config.directory.to_string_lossy().as_ref())
                    .map_err(ConfigError::ShellExpansion)?
                    .into_owned(),
            );
        }

        config.validate()?;

        Ok(config)
    }
}

impl Display for EnhancedBackupConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Naming strategy used to derive backup file names.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupFormat {
    /// `<name>.backup.<YYYY-MM-DD-HHMMSS>`
    #[default]
    Timestamped,

    /// `<name>.backup.<NNN>`
    Numbered,

    /// `<name>.backup.<first 8 hex chars of content hash>`
    GitStyle,
}

impl FromStr for BackupFormat {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data {
            "timestamped" => Ok(Self::Timestamped),
            "numbered" => Ok(Self::Numbered),
            "git_style" => Ok(Self::GitStyle),
            _ => Err(ConfigError::BackupFormat {
                value: data.to_string(),
            }),
        }
    }
}

impl Display for BackupFormat {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Timestamped => "timestamped",
            Self::Numbered => "numbered",
            Self::GitStyle => "git_style",
        })
    }
}

/// Unit of a [`RetentionPeriod`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RetentionUnit {
    Day,
    Week,
    Month,
    Year,
}

impl RetentionUnit {
    fn days(self) -> u64 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
            Self::Year => 365,
        }
    }

    fn suffix(self) -> char {
        match self {
            Self::Day => 'd',
            Self::Week => 'w',
            Self::Month => 'm',
            Self::Year => 'y',
        }
    }
}

/// Age limit written as `<integer><d|w|m|y>`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct RetentionPeriod {
    pub amount: u32,
    pub unit: RetentionUnit,
}

impl RetentionPeriod {
    /// Construct new retention period.
    pub fn new(amount: u32, unit: RetentionUnit) -> Self {
        Self { amount, unit }
    }

    /// Period as a duration. Months count as 30 days, years as 365.
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.amount) * self.unit.days() * 24 * 60 * 60)
    }
}

impl FromStr for RetentionPeriod {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::RetentionPolicy {
            value: data.to_string(),
        };

        let data = data.trim();
        let mut chars = data.chars();
        let unit = match chars.next_back() {
            Some('d') => RetentionUnit::Day,
            Some('w') => RetentionUnit::Week,
            Some('m') => RetentionUnit::Month,
            Some('y') => RetentionUnit::Year,
            _ => return Err(invalid()),
        };

        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(invalid());
        }

        let amount = digits.parse::<u32>().map_err(|_| invalid())?;
        if amount == 0 {
            return Err(invalid());
        }

        Ok(Self { amount, unit })
    }
}

impl TryFrom<String> for RetentionPeriod {
    type Error = ConfigError;

    fn try_from(data: String) -> Result<Self, Self::Error> {
        data.parse()
    }
}

impl From<RetentionPeriod> for String {
    fn from(period: RetentionPeriod) -> Self {
        period.to_string()
    }
}

impl Display for RetentionPeriod {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}{}", self.amount, self.unit.suffix())
    }
}

/// Declarative limit on backup lifetime and count.
///
/// Only `max_count` is enforced. Age and tiered limits are carried so callers
/// can inspect them, but eviction ignores them.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_count: u32,
    pub max_age: Option<RetentionPeriod>,
    pub keep_daily: Option<u32>,
    pub keep_weekly: Option<u32>,
    pub keep_monthly: Option<u32>,
}

impl RetentionPolicy {
    /// Policy declares rules that eviction does not act on.
    pub fn has_inert_rules(&self) -> bool {
        self.max_age.is_some()
            || self.keep_daily.is_some()
            || self.keep_weekly.is_some()
            || self.keep_monthly.is_some()
    }
}

/// Decision to make when a target path already exists.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictAction {
    /// Back up existing file, then proceed.
    #[default]
    Backup,

    /// Proceed without a backup.
    Overwrite,

    /// Leave existing file alone.
    Skip,
}

impl FromStr for ConflictAction {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data {
            "backup" => Ok(Self::Backup),
            "overwrite" => Ok(Self::Overwrite),
            "skip" => Ok(Self::Skip),
            _ => Err(ConfigError::ConflictAction {
                value: data.to_string(),
            }),
        }
    }
}

impl Display for ConflictAction {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Backup => "backup",
            Self::Overwrite => "overwrite",
            Self::Skip => "skip",
        })
    }
}

/// Parse octal permission string like "0644" or "755".
///
/// An empty string yields [`DEFAULT_FILE_MODE`].
///
/// # Errors
///
/// - Return [`ConfigError::FileMode`] if string is not octal, or exceeds
///   `0777`.
pub fn parse_file_mode(data: impl AsRef<str>) -> Result<u32> {
    let data = data.as_ref().trim();
    if data.is_empty() {
        return Ok(DEFAULT_FILE_MODE);
    }

    let invalid = || ConfigError::FileMode {
        value: data.to_string(),
    };

    if !data.bytes().all(|byte| matches!(byte, b'0'..=b'7')) {
        return Err(invalid());
    }

    let mode = u32::from_str_radix(data, 8).map_err(|_| invalid())?;
    if mode > 0o777 {
        return Err(invalid());
    }

    Ok(mode)
}

/// Render permission bits as four digit octal text, e.g., "0644".
pub fn format_file_mode(mode: u32) -> String {
    format!("{:04o}", mode & 0o777)
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Retention period does not follow `<integer><d|w|m|y>`.
    #[error("invalid retention policy {value:?}, expected <integer><d|w|m|y>")]
    RetentionPolicy { value: String },

    /// Unknown backup naming format.
    #[error("unknown backup format {value:?}, expected timestamped, numbered, or git_style")]
    BackupFormat { value: String },

    /// Unknown conflict action.
    #[error("unknown conflict action {value:?}, expected backup, overwrite, or skip")]
    ConflictAction { value: String },

    /// Permission string is not octal in range 0 to 0777.
    #[error("invalid file mode {value:?}")]
    FileMode { value: String },

    /// Backups are enabled, but no directory was given.
    #[error("backup directory must be set when backups are enabled")]
    MissingDirectory,
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
