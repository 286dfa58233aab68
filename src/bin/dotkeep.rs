// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotkeep::{
    backup::{create_backup, resolve_conflict, retention::enforce_retention},
    config::{ConflictAction, EnhancedBackupConfig},
    fingerprint::{fingerprint_file, walk::fingerprint_directory},
    idempotent::with_idempotency_check,
    path::{default_backup_dir, default_config_path},
    store::BackupStore,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::{
    fs, io,
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "dotkeep [options] <dotkeep-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to backup configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Backup directory to use instead of the configured one.
    #[arg(short, long, global = true, value_name = "path")]
    pub directory: Option<PathBuf>,

    /// Simulate backups without touching the file system.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let config = load_config(&self)?;
        match self.command {
            Command::Backup(opts) => run_backup(opts, &config),
            Command::Fingerprint(opts) => run_fingerprint(opts),
            Command::List(opts) => run_list(opts, &config),
            Command::Restore(opts) => run_restore(opts, &config),
            Command::Verify(opts) => run_verify(opts, &config),
            Command::Prune(opts) => run_prune(opts, config),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Back up files into backup directory.
    #[command(override_usage = "dotkeep backup [options] <path>...")]
    Backup(BackupOptions),

    /// Show fingerprint of file or directory.
    #[command(override_usage = "dotkeep fingerprint [options] <path>")]
    Fingerprint(FingerprintOptions),

    /// List backups in backup directory.
    #[command(override_usage = "dotkeep list [options] [<path>]")]
    List(ListOptions),

    /// Restore file from its backups.
    #[command(override_usage = "dotkeep restore [options] <path>")]
    Restore(RestoreOptions),

    /// Check that backups still match their checksums.
    #[command(override_usage = "dotkeep verify [options] [<path>]")]
    Verify(VerifyOptions),

    /// Remove old backups beyond retention limit.
    #[command(override_usage = "dotkeep prune [options] <path>...")]
    Prune(PruneOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BackupOptions {
    /// Files to back up.
    #[arg(required = true, value_name = "path")]
    pub paths: Vec<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct FingerprintOptions {
    /// File or directory to fingerprint.
    #[arg(required = true, value_name = "path")]
    pub path: PathBuf,

    /// Walk directories recursively.
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListOptions {
    /// Only list backups of this original file.
    #[arg(value_name = "path")]
    pub path: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RestoreOptions {
    /// Original file to restore.
    #[arg(required = true, value_name = "path")]
    pub path: PathBuf,

    /// Specific backup to restore instead of the latest one.
    #[arg(short, long, value_name = "backup")]
    pub backup: Option<PathBuf>,

    /// Restore to this path instead of the original one.
    #[arg(short, long, value_name = "path")]
    pub to: Option<PathBuf>,

    /// What to do when destination already exists.
    #[arg(long, value_name = "action", default_value_t = ConflictAction::Backup)]
    pub on_conflict: ConflictAction,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct VerifyOptions {
    /// Only verify backups of this original file.
    #[arg(value_name = "path")]
    pub path: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PruneOptions {
    /// Original files whose backups should be pruned.
    #[arg(required = true, value_name = "path")]
    pub paths: Vec<PathBuf>,

    /// Number of backups to keep instead of the configured limit.
    #[arg(short, long, value_name = "count")]
    pub keep: Option<u32>,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn load_config(cli: &Cli) -> Result<EnhancedBackupConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    let mut config = match fs::read_to_string(&path) {
        Ok(data) => data
            .parse::<EnhancedBackupConfig>()
            .with_context(|| format!("invalid configuration {:?}", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound && cli.config.is_none() => {
            EnhancedBackupConfig::new(default_backup_dir()?)
        }
        Err(err) => {
            return Err(anyhow::Error::new(err).context(format!("cannot read {:?}", path.display())))
        }
    };

    if let Some(directory) = &cli.directory {
        config.directory = directory.clone();
    }

    if cli.dry_run {
        config.dry_run = true;
    }

    config.validate()?;

    Ok(config)
}

fn run_backup(opts: BackupOptions, config: &EnhancedBackupConfig) -> Result<()> {
    for path in opts.paths {
        match create_backup(&path, config)? {
            Some(result) if result.dry_run => {
                println!("{} (dry run)", result.backup_path.display())
            }
            Some(result) => println!("{}", result.backup_path.display()),
            None => info!("no backup taken for {:?}", path.display()),
        }
    }

    Ok(())
}

fn run_fingerprint(opts: FingerprintOptions) -> Result<()> {
    if is_real_directory(&opts.path)? {
        let state = fingerprint_directory(&opts.path, opts.recursive)?;
        println!("{}: {} files", state.path.display(), state.file_count);
        for (path, file) in state.files {
            let hash = file.hash.as_deref().unwrap_or("-");
            println!("{hash}  {}", path.display());
        }
    } else {
        let state = fingerprint_file(&opts.path)?;
        let hash = match (&state.hash, &state.symlink_target) {
            (Some(hash), _) => hash.clone(),
            (None, Some(target)) => format!("-> {}", target.display()),
            (None, None) => "-".into(),
        };
        println!(
            "{hash}  {:04o}  {}  {}",
            state.mode & 0o7777,
            state.size,
            state.path.display()
        );
    }

    Ok(())
}

fn run_list(opts: ListOptions, config: &EnhancedBackupConfig) -> Result<()> {
    let store = BackupStore::open(&config.directory)?;
    let backups = match opts.path {
        Some(path) => store.history(path)?,
        None => store.list()?,
    };

    for backup in backups {
        let missing = if backup.is_present() { "" } else { "  (missing)" };
        println!(
            "{}  {}  {}{missing}",
            backup.timestamp.format("%Y-%m-%d %H:%M:%S"),
            backup.backup_path.display(),
            backup.original_path.display()
        );
    }

    Ok(())
}

fn run_restore(opts: RestoreOptions, config: &EnhancedBackupConfig) -> Result<()> {
    let store = BackupStore::open(&config.directory)?;
    let metadata = match &opts.backup {
        Some(backup) => store.find(&opts.path, backup)?,
        None => store.latest(&opts.path)?,
    }
    .ok_or_else(|| anyhow!("no backup of {:?} to restore", opts.path.display()))?;

    let destination = opts.to.unwrap_or_else(|| metadata.original_path.clone());
    if config.dry_run {
        info!(
            "dry run: would restore {:?} to {:?}",
            metadata.backup_path.display(),
            destination.display()
        );
        return Ok(());
    }

    let resolution = resolve_conflict(&destination, opts.on_conflict, config)?;
    if !resolution.proceed {
        warn!("skip restore, {:?} already exists", destination.display());
        return Ok(());
    }

    with_idempotency_check(&destination, || store.restore(&metadata, &destination))?;

    Ok(())
}

fn run_verify(opts: VerifyOptions, config: &EnhancedBackupConfig) -> Result<()> {
    let store = BackupStore::open(&config.directory)?;
    let backups = match opts.path {
        Some(path) => store.history(path)?,
        None => store.list()?,
    };

    let mut failed = 0;
    for backup in backups.iter().filter(|backup| backup.is_present()) {
        if store.verify(backup)? {
            println!("ok      {}", backup.backup_path.display());
        } else {
            println!("FAILED  {}", backup.backup_path.display());
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{failed} backups failed verification");
    }

    Ok(())
}

fn run_prune(opts: PruneOptions, mut config: EnhancedBackupConfig) -> Result<()> {
    if let Some(keep) = opts.keep {
        config.max_backups = keep;
    }

    if config.max_backups == 0 {
        warn!("no retention limit set, nothing to prune");
        return Ok(());
    }

    for path in opts.paths {
        let report = enforce_retention(&path, &config)?;
        info!(
            "kept {} backups of {:?}, removed {}",
            report.retained,
            path.display(),
            report.removed.len()
        );
    }

    Ok(())
}

// INVARIANT: Symlinks are fingerprinted as links, even when they point at
// directories.
fn is_real_directory(path: &Path) -> Result<bool> {
    let metadata = fs::symlink_metadata(path)
        .with_context(|| format!("cannot inspect {:?}", path.display()))?;
    Ok(metadata.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn directories_are_walked() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("file"), "x")?;

        assert!(is_real_directory(dir.path())?);
        assert!(!is_real_directory(&dir.path().join("file"))?);
        assert!(is_real_directory(&dir.path().join("missing")).is_err());

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_walked() -> Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("real"))?;
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link"))?;

        assert!(!is_real_directory(&dir.path().join("link"))?);
        assert!(fingerprint_file(dir.path().join("link"))?.is_symlink);

        Ok(())
    }
}
