// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::BackupFixture;

use anyhow::Result;
use dotkeep::{
    backup::{ledger::BackupIndex, resolve_conflict, sidecar::sidecar_path_for},
    config::{BackupFormat, ConflictAction},
    fingerprint::{fingerprint_file, states_equal},
    idempotent::track_changes,
    store::BackupStore,
};
use flate2::read::GzDecoder;
use pretty_assertions::assert_eq;
use std::{fs, io::Read, sync::Arc, thread};

#[test]
fn numbered_backups_keep_two_most_recent() -> Result<()> {
    let mut fixture = BackupFixture::new(BackupFormat::Numbered)?;
    fixture.config.max_backups = 2;

    for content in ["v1", "v2", "v3"] {
        assert!(fixture.write_and_backup("config.txt", content)?.is_some());
    }

    assert_eq!(
        fixture.listing()?,
        vec!["config.txt.backup.002", "config.txt.backup.003"]
    );
    assert_eq!(
        fs::read_to_string(fixture.backups().join("config.txt.backup.002"))?,
        "v2"
    );
    assert_eq!(
        fs::read_to_string(fixture.backups().join("config.txt.backup.003"))?,
        "v3"
    );

    Ok(())
}

#[test]
fn compressed_backups_decode_to_original_bytes() -> Result<()> {
    let mut fixture = BackupFixture::new(BackupFormat::Numbered)?;
    fixture.config.compression = true;

    let binary = (0..=255u8).cycle().take(10_000).collect::<Vec<_>>();
    let cases: [(&str, Vec<u8>); 3] = [
        ("empty.bin", Vec::new()),
        ("text.conf", b"[core]\n\teditor = vim\n".to_vec()),
        ("blob.bin", binary),
    ];

    for (name, content) in cases {
        let source = fixture.source(name);
        fs::write(&source, &content)?;
        let result = dotkeep::create_backup(&source, &fixture.config)?.expect("backup result");

        let mut decoded = Vec::new();
        GzDecoder::new(fs::File::open(&result.backup_path)?).read_to_end(&mut decoded)?;
        assert_eq!(decoded, content);
    }

    Ok(())
}

#[test]
fn incremental_backup_skips_unchanged_file() -> Result<()> {
    let mut fixture = BackupFixture::new(BackupFormat::Timestamped)?;
    fixture.config.incremental = true;
    fixture.config.backup_index = true;

    assert!(fixture.write_and_backup("app.conf", "a = 1")?.is_some());
    let before = fixture.listing()?;

    assert!(fixture.write_and_backup("app.conf", "a = 1")?.is_none());
    assert_eq!(fixture.listing()?, before);
    assert_eq!(BackupIndex::load(fixture.backups()).backups.len(), 1);

    // Dedup is path scoped, so identical content elsewhere still gets backed up.
    assert!(fixture.write_and_backup("other.conf", "a = 1")?.is_some());
    assert_eq!(BackupIndex::load(fixture.backups()).backups.len(), 2);

    fixture.config.backup_format = BackupFormat::Numbered;
    assert!(fixture.write_and_backup("app.conf", "a = 2")?.is_some());
    assert_eq!(BackupIndex::load(fixture.backups()).backups.len(), 3);

    Ok(())
}

#[test]
fn numbered_suffixes_ignore_compressed_and_sidecar_entries() -> Result<()> {
    let mut fixture = BackupFixture::new(BackupFormat::Numbered)?;
    fixture.config.backup_metadata = true;
    fs::create_dir_all(fixture.backups())?;
    fs::write(fixture.backups().join("config.txt.backup.004.gz"), "")?;
    fs::write(fixture.backups().join("config.txt.backup.006.meta"), "")?;

    let first = fixture.write_and_backup("config.txt", "v1")?.expect("backup result");
    let second = fixture.write_and_backup("config.txt", "v2")?.expect("backup result");

    assert_eq!(first.backup_path, fixture.backups().join("config.txt.backup.007"));
    assert_eq!(second.backup_path, fixture.backups().join("config.txt.backup.008"));

    Ok(())
}

#[test]
fn retention_keeps_most_recent_backups_with_sidecars() -> Result<()> {
    let mut fixture = BackupFixture::new(BackupFormat::Numbered)?;
    fixture.config.max_backups = 3;
    fixture.config.backup_metadata = true;

    for version in 1..=5 {
        fixture.write_and_backup("config.txt", format!("v{version}"))?;
    }

    assert_eq!(
        fixture.listing()?,
        vec![
            "config.txt.backup.003",
            "config.txt.backup.003.meta",
            "config.txt.backup.004",
            "config.txt.backup.004.meta",
            "config.txt.backup.005",
            "config.txt.backup.005.meta",
        ]
    );
    assert_eq!(
        fs::read_to_string(fixture.backups().join("config.txt.backup.005"))?,
        "v5"
    );

    Ok(())
}

#[test]
fn git_style_names_are_content_addressed() -> Result<()> {
    let fixture = BackupFixture::new(BackupFormat::GitStyle)?;

    let first = fixture.write_and_backup("app.conf", "same")?.expect("backup result");
    let second = fixture.write_and_backup("app.conf", "same")?.expect("backup result");
    let third = fixture.write_and_backup("app.conf", "different")?.expect("backup result");

    assert_eq!(first.backup_path, second.backup_path);
    assert_ne!(first.backup_path, third.backup_path);
    assert_eq!(fixture.listing()?.len(), 2);

    Ok(())
}

#[test]
fn fingerprints_track_content() -> Result<()> {
    let fixture = BackupFixture::new(BackupFormat::Numbered)?;
    let path = fixture.source("tracked.conf");
    fs::write(&path, "one")?;

    let first = fingerprint_file(&path)?;
    let second = fingerprint_file(&path)?;
    assert!(states_equal(&first, &second));

    fs::write(&path, "two")?;
    assert!(!states_equal(&first, &fingerprint_file(&path)?));

    let ghost = fixture.source("ghost.conf");
    assert!(fingerprint_file(&ghost).is_err_and(|err| err.is_not_found()));

    Ok(())
}

#[cfg(unix)]
#[test]
fn symlinks_compare_by_target() -> Result<()> {
    use std::os::unix::fs::symlink;

    let fixture = BackupFixture::new(BackupFormat::Numbered)?;
    fs::write(fixture.source("a.conf"), "same")?;
    fs::write(fixture.source("b.conf"), "same")?;
    symlink(fixture.source("a.conf"), fixture.source("link-a"))?;
    symlink(fixture.source("b.conf"), fixture.source("link-b"))?;

    let link_a = fingerprint_file(fixture.source("link-a"))?;
    let link_b = fingerprint_file(fixture.source("link-b"))?;
    assert!(link_a.is_symlink);
    assert_eq!(link_a.hash, None);
    assert!(!states_equal(&link_a, &link_b));
    assert!(states_equal(&link_a, &fingerprint_file(fixture.source("link-a"))?));

    Ok(())
}

#[test]
fn concurrent_backups_share_one_ledger() -> Result<()> {
    let mut fixture = BackupFixture::new(BackupFormat::Numbered)?;
    fixture.config.backup_index = true;
    let fixture = Arc::new(fixture);

    let workers = (0..8)
        .map(|worker| {
            let fixture = Arc::clone(&fixture);
            thread::spawn(move || -> Result<()> {
                let name = format!("worker-{worker}.conf");
                for round in 0..5 {
                    fixture.write_and_backup(&name, format!("{worker}:{round}"))?;
                }
                Ok(())
            })
        })
        .collect::<Vec<_>>();

    for worker in workers {
        worker.join().expect("worker panicked")?;
    }

    let index = BackupIndex::load(fixture.backups());
    assert_eq!(index.backups.len(), 40);
    assert!(index.backups.iter().all(|entry| entry.is_present()));

    Ok(())
}

#[test]
fn concurrent_backups_through_aliased_directories() -> Result<()> {
    let mut fixture = BackupFixture::new(BackupFormat::Numbered)?;
    fixture.config.backup_index = true;
    fs::create_dir_all(fixture.backups())?;
    fs::create_dir_all(fixture.source("sub"))?;

    let mut aliased = fixture.config.clone();
    aliased.directory = fixture.source("sub").join("../../backups");
    let configs = [fixture.config.clone(), aliased];

    let workers = (0..8)
        .map(|worker| {
            let config = configs[worker % 2].clone();
            let source = fixture.source(format!("worker-{worker}.conf"));
            thread::spawn(move || -> Result<()> {
                for round in 0..25 {
                    fs::write(&source, format!("{worker}:{round}"))?;
                    dotkeep::create_backup(&source, &config)?;
                }
                Ok(())
            })
        })
        .collect::<Vec<_>>();

    for worker in workers {
        worker.join().expect("worker panicked")?;
    }

    let index = BackupIndex::load(fixture.backups());
    assert_eq!(index.backups.len(), 200);
    assert!(fixture
        .listing()?
        .iter()
        .all(|name| !name.ends_with(".tmp")));

    Ok(())
}

#[test]
fn conflict_backup_then_restore_round_trip() -> Result<()> {
    let mut fixture = BackupFixture::new(BackupFormat::Numbered)?;
    fixture.config.backup_metadata = true;
    fixture.config.compression = true;

    let target = fixture.source("settings.toml");
    fs::write(&target, "theme = \"dark\"\n")?;

    let resolution = resolve_conflict(&target, ConflictAction::Backup, &fixture.config)?;
    assert!(resolution.proceed);
    let backup_path = resolution.backup_path.expect("conflict backup");
    assert!(sidecar_path_for(&backup_path).exists());

    fs::write(&target, "theme = \"light\"\n")?;

    let store = BackupStore::open(fixture.backups())?;
    let latest = store.latest(&target)?.expect("latest backup");
    assert_eq!(latest.backup_path, backup_path);
    assert!(store.verify(&latest)?);

    let (_, report) = track_changes(&target, || store.restore(&latest, &target))?;
    assert_eq!(report.changed, Some(true));
    assert_eq!(fs::read_to_string(&target)?, "theme = \"dark\"\n");

    let (_, report) = track_changes(&target, || store.restore(&latest, &target))?;
    assert!(report.is_noop());

    Ok(())
}

#[test]
fn dry_run_never_touches_backup_directory() -> Result<()> {
    let mut fixture = BackupFixture::new(BackupFormat::Numbered)?;
    fixture.config.dry_run = true;
    fixture.config.backup_index = true;
    fixture.config.max_backups = 1;

    for content in ["v1", "v2"] {
        let result = fixture.write_and_backup("config.txt", content)?.expect("dry run result");
        assert!(result.dry_run);
        assert!(!result.backup_path.exists());
    }

    assert!(fixture.listing()?.is_empty());

    Ok(())
}
