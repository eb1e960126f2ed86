//! Restoring a subvolume from a backup repository.

use log::info;

use crate::{
    commands::sync::{deploy, Filters},
    error::{BackupResult, SyncErrorKind},
    repository::Repository,
    snapshot::{SnapshotName, Subvolume},
};

/// Options controlling a [`restore`] run.
#[derive(Clone, Copy, Debug, Default)]
pub struct RestoreOptions {
    /// Only restore the snapshot into the destination repository, not the
    /// live subvolume.
    pub snapshots_only: bool,
}

/// Restore one subvolume from a backup repository.
///
/// Transfers the most recent snapshot of the subvolume back into the
/// destination repository and, unless `snapshots_only` is set, recreates the
/// live subvolume as a writable snapshot of it.
///
/// # Arguments
///
/// * `src` - The repository holding the backed up snapshots
/// * `dst` - The repository snapshots are restored into
/// * `subvolume` - The subvolume to restore
/// * `filters` - The user's filter commands
/// * `opts` - The restore options
///
/// # Errors
///
/// * [`SyncErrorKind::NoSnapshotToRestore`] - If the source repository has no snapshot of the subvolume
/// * [`SyncErrorKind::SubvolumeExists`] - If the live subvolume path already exists
pub fn restore(
    src: &Repository,
    dst: &Repository,
    subvolume: &Subvolume,
    filters: &Filters,
    opts: &RestoreOptions,
) -> BackupResult<SnapshotName> {
    let tag = subvolume.tag();

    let snapshot = src
        .latest(tag)?
        .ok_or_else(|| SyncErrorKind::NoSnapshotToRestore {
            tag: tag.to_string(),
            repo: src.root().to_path_buf(),
        })?;

    // btrfs would happily manifest the new subvolume inside an existing
    // directory of the same name, so guard against that here
    if !opts.snapshots_only && subvolume.path().is_dir() {
        return Err(SyncErrorKind::SubvolumeExists(subvolume.path().to_path_buf()).into());
    }

    let dst_snapshots = dst.list(tag)?;
    if dst_snapshots.contains(&snapshot) {
        info!("{snapshot} is already present in {}", dst.root().display());
    } else {
        let src_snapshots = src.list(tag)?;
        deploy(src, dst, &snapshot, &src_snapshots, &dst_snapshots, filters)?;
    }

    if !opts.snapshots_only {
        dst.materialize(&snapshot, subvolume)?;
    }

    Ok(snapshot)
}
