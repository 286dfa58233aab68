// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup file naming strategies.
//!
//! Every backup is named `<basename>.backup.<suffix>`, where the suffix comes
//! from the active [`BackupFormat`]:
//!
//! - __timestamped__: local time down to the second, `YYYY-MM-DD-HHMMSS`.
//!   Two backups of the same file within one second share a name, and the
//!   second one replaces the first.
//! - __numbered__: one more than the highest three digit counter already
//!   present in the backup directory, starting at `001`.
//! - __git_style__: first eight hex characters of the content hash. Same
//!   content always maps to the same name.
//!
//! Compressed backups carry an extra `.gz` suffix, and sidecars an extra
//! `.meta` suffix. Neither affects the counter of the numbered format.

use crate::{backup::sidecar::SIDECAR_SUFFIX, config::BackupFormat};

use chrono::{DateTime, Local};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Separator between source basename and strategy suffix.
pub const BACKUP_INFIX: &str = ".backup.";

/// Suffix appended to gzip compressed backups.
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// Layout of the timestamped suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Derive backup file name for a source basename.
///
/// # Errors
///
/// - Return [`std::io::Error`] if the numbered format cannot list the backup
///   directory.
pub fn backup_file_name(
    format: BackupFormat,
    basename: &str,
    directory: &Path,
    checksum: &str,
    now: DateTime<Local>,
) -> io::Result<String> {
    let suffix = match format {
        BackupFormat::Timestamped => now.format(TIMESTAMP_FORMAT).to_string(),
        BackupFormat::Numbered => format!("{:03}", next_number(directory, basename)?),
        BackupFormat::GitStyle => checksum.chars().take(8).collect(),
    };

    Ok(format!("{basename}{BACKUP_INFIX}{suffix}"))
}

/// Append compressed suffix to a backup path when compression is on.
pub fn with_compression_suffix(path: PathBuf, compressed: bool) -> PathBuf {
    if !compressed {
        return path;
    }

    let mut raw = path.into_os_string();
    raw.push(COMPRESSED_SUFFIX);
    PathBuf::from(raw)
}

/// Determine next counter for the numbered format.
///
/// Scans backup directory for `<basename>.backup.<NNN>` entries, ignoring
/// `.gz` and `.meta` suffixes, and returns one more than the highest counter.
/// A missing directory starts the count at one.
///
/// # Errors
///
/// - Return [`std::io::Error`] if backup directory cannot be read.
pub fn next_number(directory: &Path, basename: &str) -> io::Result<u32> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(1),
        Err(err) => return Err(err),
    };

    let prefix = format!("{basename}{BACKUP_INFIX}");
    let mut highest = 0;
    for entry in entries {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };

        let rest = rest.strip_suffix(SIDECAR_SUFFIX).unwrap_or(rest);
        let rest = rest.strip_suffix(COMPRESSED_SUFFIX).unwrap_or(rest);
        if rest.is_empty() || !rest.bytes().all(|byte| byte.is_ascii_digit()) {
            continue;
        }

        if let Ok(number) = rest.parse::<u32>() {
            highest = highest.max(number);
        }
    }

    Ok(highest.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use tempfile::TempDir;

    #[test]
    fn timestamped_name_has_second_granularity() -> anyhow::Result<()> {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let name = backup_file_name(
            BackupFormat::Timestamped,
            "config.txt",
            Path::new("/unused"),
            "",
            now,
        )?;
        assert_eq!(name, "config.txt.backup.2024-03-09-070501");

        Ok(())
    }

    #[test]
    fn git_style_name_uses_hash_prefix() -> anyhow::Result<()> {
        let name = backup_file_name(
            BackupFormat::GitStyle,
            ".bashrc",
            Path::new("/unused"),
            "3bfc269594ef649228e9a74b",
            Local::now(),
        )?;
        assert_eq!(name, ".bashrc.backup.3bfc2695");

        Ok(())
    }

    #[test]
    fn numbered_starts_at_one_without_directory() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let name = backup_file_name(
            BackupFormat::Numbered,
            "config.txt",
            &dir.path().join("missing"),
            "",
            Local::now(),
        )?;
        assert_eq!(name, "config.txt.backup.001");

        Ok(())
    }

    #[test_case(&["config.txt.backup.001"], 2; "plain")]
    #[test_case(&["config.txt.backup.004.gz"], 5; "compressed")]
    #[test_case(&["config.txt.backup.007.meta"], 8; "sidecar only")]
    #[test_case(&["config.txt.backup.003.gz.meta", "config.txt.backup.002"], 4; "mixed")]
    #[test_case(&["other.txt.backup.009", "config.txt.backup.2024-03-09-070501"], 1; "foreign entries")]
    #[test]
    fn numbered_counter_skips_suffixes(existing: &[&str], expect: u32) {
        let dir = TempDir::new().unwrap();
        for name in existing {
            fs::write(dir.path().join(name), "").unwrap();
        }

        pretty_assertions::assert_eq!(next_number(dir.path(), "config.txt").unwrap(), expect);
    }

    #[test]
    fn compression_suffix_is_optional() {
        let path = PathBuf::from("/b/config.txt.backup.001");
        assert_eq!(
            with_compression_suffix(path.clone(), true),
            PathBuf::from("/b/config.txt.backup.001.gz")
        );
        assert_eq!(with_compression_suffix(path.clone(), false), path);
    }
}
