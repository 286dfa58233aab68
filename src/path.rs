// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine default locations for files that Dotkeep needs to read or write
//! when the caller does not say otherwise.

use std::path::PathBuf;

/// Determine default absolute path to backup directory.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/dotkeep/backups` as the
/// default absolute path for backups. Does not check if the path returned
/// actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if data directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_backup_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("dotkeep").join("backups"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to backup configuration file.
///
/// Uses `$XDG_CONFIG_HOME/dotkeep/backup.toml`. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory path cannot be
///   determined.
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("dotkeep").join("backup.toml"))
        .ok_or(NoWayHome)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::data_dir`](https://docs.rs/dirs/latest/dirs/fn.data_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use sealed_test::prelude::*;

    #[cfg(target_os = "linux")]
    #[sealed_test(env = [("XDG_DATA_HOME", "/tmp/xdg/data"), ("XDG_CONFIG_HOME", "/tmp/xdg/config")])]
    fn default_paths_follow_xdg() -> anyhow::Result<()> {
        assert_eq!(
            default_backup_dir()?,
            PathBuf::from("/tmp/xdg/data/dotkeep/backups")
        );
        assert_eq!(
            default_config_path()?,
            PathBuf::from("/tmp/xdg/config/dotkeep/backup.toml")
        );

        Ok(())
    }
}
