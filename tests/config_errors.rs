//! btrfs-backup Integration Tests for configuration errors
//!
//! Invalid invocations have to abort the whole run with a non-zero exit
//! code before any subvolume is processed.

use assert_cmd::Command;
use predicates::prelude::{predicate, PredicateBooleanExt};

fn runner() -> Command {
    Command::cargo_bin("btrfs-backup").unwrap()
}

#[test]
fn backup_requires_repositories_and_subvolumes() {
    runner().arg("backup").assert().failure();

    runner()
        .args(["backup", "/tmp/snapshots", "/tmp/backup"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no subvolume given"));
}

#[test]
fn invalid_durations_are_rejected() {
    for duration in ["1x", "0d", "d", "1 d"] {
        runner()
            .args(["backup", "/tmp/snapshots", "/tmp/backup", "-s", "/tmp/sv"])
            .args(["--keep-for", duration])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid duration string"));
    }
}

#[test]
fn filters_must_be_absolute_paths() {
    runner()
        .args(["backup", "/tmp/snapshots", "/tmp/backup", "-s", "/tmp/sv"])
        .args(["--send-filter", "gzip -9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absolute path"));
}

#[test]
fn remote_commands_must_be_absolute_paths() {
    runner()
        .args(["backup", "/tmp/snapshots", "/tmp/backup", "-s", "/tmp/sv"])
        .args(["--remote-cmd", "ssh server"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absolute path"));
}

#[test]
fn snapshot_ext_needs_the_designated_filter() {
    // no receive filter at all
    runner()
        .args(["backup", "/tmp/snapshots", "/tmp/backup", "-s", "/tmp/sv"])
        .args(["--snapshot-ext", "gpg"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--recv-filter"));

    // a receive filter without the placeholder
    runner()
        .args(["backup", "/tmp/snapshots", "/tmp/backup", "-s", "/tmp/sv"])
        .args(["--snapshot-ext", "gpg", "--recv-filter", "/usr/bin/gpg --encrypt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("{file}"));

    // on restore the placeholder belongs into the first send filter
    runner()
        .args(["restore", "/tmp/backup", "/tmp/snapshots", "-s", "/tmp/sv"])
        .args(["--snapshot-ext", "gpg", "--recv-filter", "/usr/bin/gpg --decrypt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--send-filter"));
}

#[test]
fn live_restore_from_a_file_repository_is_fatal_up_front() {
    // without receive filters the live subvolume cannot be rebuilt from the
    // snapshot files; the invocation aborts before any subvolume is
    // processed instead of failing per subvolume
    runner()
        .args(["restore", "/tmp/backup", "/tmp/snapshots"])
        .args(["-s", "/tmp/sv1", "-s", "/tmp/sv2"])
        .args(["--snapshot-ext", "gpg", "--send-filter", "/bin/cat {file}"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--snapshots-only"))
        .stderr(predicate::str::contains("restore failed for").not());
}

#[test]
fn stray_file_placeholders_are_rejected() {
    runner()
        .args(["backup", "/tmp/snapshots", "/tmp/backup", "-s", "/tmp/sv"])
        .args(["--send-filter", "/bin/dd if={file}"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("only allowed"));
}

#[test]
fn snapshot_ext_must_not_start_with_a_dot() {
    runner()
        .args(["backup", "/tmp/snapshots", "/tmp/backup", "-s", "/tmp/sv"])
        .args(["--snapshot-ext", ".gpg", "--recv-filter", "/bin/dd of={file}"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must not start with a dot"));
}
