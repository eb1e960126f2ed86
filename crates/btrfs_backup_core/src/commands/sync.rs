//! Synchronizing a subvolume from a source to a destination repository.

use chrono::Duration;
use log::{debug, info};

use crate::{
    command::StderrMode,
    error::BackupResult,
    pipeline,
    repository::Repository,
    snapshot::{SnapshotName, Subvolume},
};

/// The filter commands inserted into the transfer pipeline.
#[derive(Clone, Debug, Default)]
pub struct Filters {
    /// Filters applied to the stream after serialization, in order.
    pub send: Vec<Vec<String>>,
    /// Filters applied to the stream before deserialization, in order.
    pub recv: Vec<Vec<String>>,
}

/// Options controlling a [`sync`] run.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyncOptions {
    /// Purge source snapshots older than this after a successful sync.
    pub keep_for: Option<Duration>,
}

/// The outcome of syncing one subvolume.
#[derive(Clone, Debug)]
pub struct SyncOutcome {
    /// The snapshot both repositories now hold.
    pub snapshot: SnapshotName,
    /// Whether a transfer took place; false when both sides were in sync.
    pub transferred: bool,
}

/// Synchronize one subvolume between two repositories.
///
/// Ensures an up-to-date snapshot in the source repository, transfers it to
/// the destination unless it is already there, and finally applies the
/// retention policy to the source.
///
/// # Arguments
///
/// * `src` - The repository snapshots are taken into
/// * `dst` - The repository snapshots are backed up to
/// * `subvolume` - The subvolume to synchronize
/// * `filters` - The user's filter commands
/// * `opts` - The sync options
///
/// # Errors
///
/// Errors of the underlying repository operations and of the transfer
/// pipeline are passed through.
pub fn sync(
    src: &Repository,
    dst: &Repository,
    subvolume: &Subvolume,
    filters: &Filters,
    opts: &SyncOptions,
) -> BackupResult<SyncOutcome> {
    let tag = subvolume.tag();

    let snapshot = src.snapshot(subvolume)?;
    let src_snapshots = src.list(tag)?;
    let dst_snapshots = dst.list(tag)?;

    let transferred = if dst_snapshots.contains(&snapshot) {
        info!("{snapshot} is already present in {}", dst.root().display());
        false
    } else {
        deploy(src, dst, &snapshot, &src_snapshots, &dst_snapshots, filters)?;
        true
    };

    if let Some(keep_for) = opts.keep_for {
        _ = src.purge(tag, keep_for)?;
    }

    Ok(SyncOutcome {
        snapshot,
        transferred,
    })
}

/// Transfer `snapshot` from `src` to `dst` through the filter pipeline.
///
/// The parent for the incremental transfer is the most recent snapshot
/// present in both inventories; without one a full send is performed. A
/// failed transfer into a file repository does not leave a partial snapshot
/// file behind.
pub(crate) fn deploy(
    src: &Repository,
    dst: &Repository,
    snapshot: &SnapshotName,
    src_snapshots: &[SnapshotName],
    dst_snapshots: &[SnapshotName],
    filters: &Filters,
) -> BackupResult<()> {
    let parent = select_parent(src_snapshots, dst_snapshots);
    match &parent {
        Some(parent) => debug!("using parent {parent}"),
        None => debug!("no common snapshot, performing a full send"),
    }

    // the snapshot has to be persisted to disk before it can be serialized
    if !src.is_file_repository() {
        src.filesystem_sync()?;
    }

    let source = src.send_stage(snapshot, parent.as_ref())?;
    let sink = dst.receive_stage(snapshot)?;
    let stages = pipeline::assemble(source, &filters.send, &filters.recv, sink)?;

    // only if both repositories agree to read stderr we will do so
    let stderr = StderrMode::Capture.apply_policy(src.read_stderr() && dst.read_stderr());

    info!("transferring {snapshot} to {}", dst.root().display());
    if let Err(err) = pipeline::run(&stages, stderr) {
        dst.remove_partial(snapshot);
        return Err(err);
    }
    Ok(())
}

/// The most recent snapshot present in both inventories, by name.
fn select_parent(
    src_snapshots: &[SnapshotName],
    dst_snapshots: &[SnapshotName],
) -> Option<SnapshotName> {
    dst_snapshots
        .iter()
        .filter(|name| src_snapshots.contains(name))
        .max()
        .cloned()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDateTime, Utc};

    use super::*;

    fn snapshot(t: &str, generation: u64) -> SnapshotName {
        let time: DateTime<Utc> = NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc();
        SnapshotName::new("sv", time, generation, None)
    }

    #[test]
    fn parent_is_the_most_recent_common_snapshot() {
        let src = [
            snapshot("2024-01-15 12:00:00", 0),
            snapshot("2024-01-15 12:05:00", 0),
            snapshot("2024-01-15 12:10:00", 0),
        ];
        let dst = [
            snapshot("2024-01-15 12:00:00", 0),
            snapshot("2024-01-15 12:05:00", 0),
        ];

        let parent = select_parent(&src, &dst).unwrap();
        assert_eq!(parent.to_string(), "sv-2024-01-15_12:05:00_0");
    }

    #[test]
    fn no_common_snapshot_means_full_send() {
        let src = [snapshot("2024-01-15 12:00:00", 0)];
        assert!(select_parent(&src, &[]).is_none());

        let dst = [snapshot("2024-01-15 11:00:00", 0)];
        assert!(select_parent(&src, &dst).is_none());
    }

    #[test]
    fn parent_selection_distinguishes_generations() {
        let src = [
            snapshot("2024-01-15 12:00:00", 0),
            snapshot("2024-01-15 12:00:00", 1),
        ];
        let dst = [snapshot("2024-01-15 12:00:00", 0)];

        let parent = select_parent(&src, &dst).unwrap();
        assert_eq!(parent.to_string(), "sv-2024-01-15_12:00:00_0");
    }
}
