//! btrfs-backup Integration Tests for Backup and Restore
//!
//! Runs the application as a subprocess against repositories in temporary
//! directories. The `btrfs` utility is replaced by a small stub on `PATH`
//! which mimics the handful of invocations the program performs, so the
//! tests cover snapshot creation, pipeline wiring, retention and restore
//! without needing a real btrfs filesystem.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::predicate;
use tempfile::{tempdir, TempDir};

/// A btrfs stub for repositories that have no changes: the live subvolume
/// and the latest snapshot always report the same generation.
const BTRFS_UNCHANGED: &str = r#"#!/bin/sh
case "$1" in
  send)
    shift
    echo "btrfs-send-stream $@"
    ;;
  receive)
    cat >/dev/null
    mkdir -p "$2/restored-subvolume"
    ;;
  filesystem)
    ;;
  subvolume)
    case "$2" in
      show) printf '\tGeneration:\t\t5\n' ;;
      snapshot)
        if [ "$3" = "-r" ]; then mkdir -p "$5"; else mkdir -p "$4"; fi
        ;;
      delete) rm -rf "$3" ;;
    esac
    ;;
esac
exit 0
"#;

/// A btrfs stub for a live subvolume that is always ahead of its snapshots.
const BTRFS_CHANGED: &str = r#"#!/bin/sh
case "$1" in
  send)
    shift
    echo "btrfs-send-stream $@"
    ;;
  receive)
    cat >/dev/null
    mkdir -p "$2/restored-subvolume"
    ;;
  filesystem)
    ;;
  subvolume)
    case "$2" in
      show)
        case "$3" in
          */snapshots/*) printf '\tGeneration:\t\t5\n' ;;
          *) printf '\tGeneration:\t\t9\n' ;;
        esac
        ;;
      snapshot)
        if [ "$3" = "-r" ]; then mkdir -p "$5"; else mkdir -p "$4"; fi
        ;;
      delete) rm -rf "$3" ;;
    esac
    ;;
esac
exit 0
"#;

struct Setup {
    _temp: TempDir,
    bin: PathBuf,
    subvolume: PathBuf,
    snapshots: PathBuf,
    backup: PathBuf,
}

fn setup(btrfs: &str) -> Setup {
    let temp = tempdir().unwrap();
    let bin = temp.path().join("bin");
    fs::create_dir(&bin).unwrap();
    let stub = bin.join("btrfs");
    fs::write(&stub, btrfs).unwrap();
    fs::set_permissions(&stub, fs::Permissions::from_mode(0o755)).unwrap();

    let subvolume = temp.path().join("home");
    let snapshots = temp.path().join("snapshots");
    let backup = temp.path().join("backup");
    fs::create_dir(&subvolume).unwrap();
    fs::create_dir(&snapshots).unwrap();
    fs::create_dir(&backup).unwrap();

    Setup {
        bin,
        subvolume,
        snapshots,
        backup,
        _temp: temp,
    }
}

fn runner(bin: &Path) -> Command {
    let mut runner = Command::cargo_bin("btrfs-backup").unwrap();
    let path = format!(
        "{}:{}",
        bin.display(),
        std::env::var("PATH").unwrap_or_default()
    );
    _ = runner.env("PATH", path);
    runner
}

fn entries(dir: &Path) -> Vec<String> {
    let mut entries: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    entries.sort();
    entries
}

fn backup_to_file_repo(env: &Setup, extra: &[&str]) -> assert_cmd::assert::Assert {
    let mut runner = runner(&env.bin);
    _ = runner
        .arg("backup")
        .arg(&env.snapshots)
        .arg(&env.backup)
        .arg("--subvolume")
        .arg(&env.subvolume)
        .arg("--snapshot-ext")
        .arg("stream")
        .arg("--recv-filter")
        .arg("/bin/sh -c 'exec cat > {file}'");
    _ = runner.args(extra);
    runner.assert()
}

#[test]
fn backup_into_a_file_repository() {
    let env = setup(BTRFS_UNCHANGED);

    backup_to_file_repo(&env, &[]).success();

    // a snapshot was taken and its serialized stream stored as a file
    let snapshots = entries(&env.snapshots);
    assert_eq!(snapshots.len(), 1);
    assert!(snapshots[0].starts_with("home-"), "{snapshots:?}");

    let blobs = entries(&env.backup);
    assert_eq!(blobs, [format!("{}.stream", snapshots[0])]);

    // the first transfer of a subvolume is a full send
    let content = fs::read_to_string(env.backup.join(&blobs[0])).unwrap();
    assert!(content.starts_with("btrfs-send-stream"), "{content}");
    assert!(!content.contains("-p"), "{content}");
}

#[test]
fn unchanged_subvolume_is_a_no_op() {
    let env = setup(BTRFS_UNCHANGED);

    backup_to_file_repo(&env, &[]).success();
    // the subvolume has no new data and the destination already holds the
    // snapshot, so neither a new snapshot nor a transfer happens
    backup_to_file_repo(&env, &[])
        .success()
        .stderr(predicate::str::contains("is up to date"));

    assert_eq!(entries(&env.snapshots).len(), 1);
    assert_eq!(entries(&env.backup).len(), 1);
}

#[test]
fn changed_subvolume_gets_an_incremental_send() {
    let env = setup(BTRFS_CHANGED);

    backup_to_file_repo(&env, &[]).success();
    let first = entries(&env.backup);

    backup_to_file_repo(&env, &[]).success();
    let second = entries(&env.backup);
    assert_eq!(second.len(), 2, "{second:?}");

    let new_blob = second.iter().find(|blob| !first.contains(blob)).unwrap();
    let parent = first[0].trim_end_matches(".stream");
    let content = fs::read_to_string(env.backup.join(new_blob)).unwrap();
    assert!(content.contains("-p"), "{content}");
    assert!(content.contains(parent), "{content}");
}

#[test]
fn failing_filter_leaves_no_partial_snapshot_file() {
    let env = setup(BTRFS_UNCHANGED);

    runner(&env.bin)
        .arg("backup")
        .arg(&env.snapshots)
        .arg(&env.backup)
        .arg("--subvolume")
        .arg(&env.subvolume)
        .arg("--snapshot-ext")
        .arg("stream")
        .arg("--recv-filter")
        .arg("/bin/sh -c 'cat > {file}; exit 1'")
        .assert()
        .failure()
        .stderr(predicate::str::contains("exited with"))
        .stderr(predicate::str::contains("backup failed for 1 subvolume(s)"));

    // the half-written snapshot file was cleaned up again
    assert_eq!(entries(&env.backup).len(), 0);
}

#[test]
fn over_age_snapshots_are_purged_after_a_backup() {
    let env = setup(BTRFS_CHANGED);
    let expired = env.snapshots.join("home-2020-01-01_00:00:00_0");
    fs::create_dir(&expired).unwrap();

    backup_to_file_repo(&env, &["--keep-for", "1d"]).success();

    // the expired snapshot is gone, the fresh one survives
    assert!(!expired.exists());
    let snapshots = entries(&env.snapshots);
    assert_eq!(snapshots.len(), 1);
    assert_ne!(snapshots[0], "home-2020-01-01_00:00:00_0");
}

#[test]
fn dry_run_spawns_nothing() {
    let env = setup(BTRFS_CHANGED);

    backup_to_file_repo(&env, &["--dry-run"])
        .success()
        .stderr(predicate::str::contains("would sync"));

    assert_eq!(entries(&env.snapshots).len(), 0);
    assert_eq!(entries(&env.backup).len(), 0);
}

#[test]
fn reverse_restore_uses_the_backup_argument_order() {
    let env = setup(BTRFS_UNCHANGED);
    fs::write(
        env.backup.join("home-2024-01-15_12:00:00_0.stream"),
        "btrfs-send-stream\n",
    )
    .unwrap();
    let live = env.subvolume.parent().unwrap().join("data").join("home");

    // same positional order as the paired backup invocation
    runner(&env.bin)
        .arg("restore")
        .arg(&env.snapshots)
        .arg(&env.backup)
        .arg("--reverse")
        .arg("--subvolume")
        .arg(&live)
        .arg("--snapshot-ext")
        .arg("stream")
        .arg("--recv-filter")
        .arg("/bin/cat {file}")
        .arg("--send-filter")
        .arg("/bin/cat")
        .assert()
        .success();

    // the snapshot came back through btrfs receive and the live subvolume
    // was materialized from it
    assert!(env.snapshots.join("restored-subvolume").is_dir());
    assert!(live.is_dir());
}

#[test]
fn snapshots_only_restore_skips_the_live_subvolume() {
    let env = setup(BTRFS_UNCHANGED);
    fs::write(
        env.backup.join("home-2024-01-15_12:00:00_0.stream"),
        "btrfs-send-stream\n",
    )
    .unwrap();
    let live = env.subvolume.parent().unwrap().join("data").join("home");

    runner(&env.bin)
        .arg("restore")
        .arg(&env.backup)
        .arg(&env.snapshots)
        .arg("--snapshots-only")
        .arg("--subvolume")
        .arg(&live)
        .arg("--snapshot-ext")
        .arg("stream")
        .arg("--send-filter")
        .arg("/bin/cat {file}")
        .assert()
        .success();

    assert!(env.snapshots.join("restored-subvolume").is_dir());
    assert!(!live.exists());
}

#[test]
fn snapshots_command_lists_the_inventory() {
    let env = setup(BTRFS_UNCHANGED);
    fs::create_dir(env.snapshots.join("home-2024-01-15_12:00:00_0")).unwrap();
    fs::create_dir(env.snapshots.join("home-2024-01-15_12:05:00_0")).unwrap();
    fs::create_dir(env.snapshots.join("not-a-snapshot")).unwrap();

    runner(&env.bin)
        .arg("snapshots")
        .arg(&env.snapshots)
        .assert()
        .success()
        .stdout(predicate::str::contains("home-2024-01-15_12:00:00_0"))
        .stdout(predicate::str::contains("home-2024-01-15_12:05:00_0"))
        .stdout(predicate::str::contains("total: 2 snapshot(s)"));
}
