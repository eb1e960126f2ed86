//! Snapshot repositories.
//!
//! A repository is a directory holding snapshots of one or more subvolumes:
//! either read-only btrfs subvolumes (the usual case) or opaque snapshot
//! files produced by user supplied filters. A repository may live on another
//! host, in which case every command touching it runs through the remote
//! command prefix.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, Timelike, Utc};
use itertools::Itertools;
use log::{debug, info};

use crate::{
    command::{self, StderrMode},
    error::{BackupResult, RepositoryErrorKind},
    pipeline::{Sink, Source, Stage},
    snapshot::{SnapshotName, Subvolume},
};

pub(super) mod constants {
    /// The external tool performing all btrfs operations.
    pub(super) const BTRFS: &str = "btrfs";
}

/// What a repository stores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepositoryKind {
    /// Read-only btrfs subvolumes, written by `btrfs receive`.
    Subvolume,
    /// Opaque snapshot files, written by the user's receive filters.
    File {
        /// the extension shared by all snapshot files in the repository
        extension: String,
    },
}

/// Options for opening a [`Repository`].
#[derive(Clone, Debug)]
pub struct RepositoryOptions {
    /// Command prefix making commands run on the repository's host.
    pub remote_cmd: Option<Vec<String>>,
    /// Snapshot file extension; turns the repository into a file repository.
    pub snapshot_ext: Option<String>,
    /// Whether stderr of spawned commands may be read.
    pub read_stderr: bool,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            remote_cmd: None,
            snapshot_ext: None,
            read_stderr: true,
        }
    }
}

/// A repository for snapshots.
#[derive(Clone, Debug)]
pub struct Repository {
    root: PathBuf,
    kind: RepositoryKind,
    remote_cmd: Option<Vec<String>>,
    read_stderr: bool,
}

impl Repository {
    /// Open the repository rooted at `root`.
    ///
    /// # Arguments
    ///
    /// * `root` - The repository directory
    /// * `opts` - The repository options
    ///
    /// # Errors
    ///
    /// * [`RepositoryErrorKind::ExtensionStartsWithDot`] - If the snapshot extension starts with a dot
    /// * [`RepositoryErrorKind::RemoteCommandNotAbsolute`] - If the remote command is not an absolute path
    pub fn open(root: impl Into<PathBuf>, opts: RepositoryOptions) -> BackupResult<Self> {
        let kind = match opts.snapshot_ext {
            Some(extension) => {
                if extension.starts_with('.') {
                    return Err(RepositoryErrorKind::ExtensionStartsWithDot(extension).into());
                }
                RepositoryKind::File { extension }
            }
            None => RepositoryKind::Subvolume,
        };

        if let Some(program) = opts.remote_cmd.as_ref().and_then(|cmd| cmd.first()) {
            if !Path::new(program).is_absolute() {
                return Err(RepositoryErrorKind::RemoteCommandNotAbsolute(program.clone()).into());
            }
        }

        Ok(Self {
            root: root.into(),
            kind,
            remote_cmd: opts.remote_cmd,
            read_stderr: opts.read_stderr,
        })
    }

    /// The root directory of the repository.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// What this repository stores.
    #[must_use]
    pub fn kind(&self) -> &RepositoryKind {
        &self.kind
    }

    /// Whether this repository stores snapshot files instead of subvolumes.
    #[must_use]
    pub fn is_file_repository(&self) -> bool {
        matches!(self.kind, RepositoryKind::File { .. })
    }

    /// Whether commands touching this repository run on another host.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.remote_cmd.is_some()
    }

    pub(crate) fn read_stderr(&self) -> bool {
        self.read_stderr
    }

    fn stderr_mode(&self) -> StderrMode {
        StderrMode::Capture.apply_policy(self.read_stderr)
    }

    /// The path a snapshot with the given name occupies in this repository.
    ///
    /// The name's extension is normalized to the repository's kind: file
    /// repositories append their extension, subvolume repositories none.
    #[must_use]
    pub fn path_of(&self, name: &SnapshotName) -> PathBuf {
        let name = match &self.kind {
            RepositoryKind::Subvolume => name.with_extension(None),
            RepositoryKind::File { extension } => name.with_extension(Some(extension.clone())),
        };
        self.root.join(name.to_string())
    }

    /// Prefix an argument vector with the remote command when necessary.
    fn command(&self, argv: &[&str]) -> Vec<String> {
        let mut command = self.remote_cmd.clone().unwrap_or_default();
        command.extend(argv.iter().map(ToString::to_string));
        command
    }

    /// Whether a directory entry belongs into this repository.
    fn matches_kind(&self, name: &SnapshotName) -> bool {
        match &self.kind {
            RepositoryKind::Subvolume => name.extension.is_none(),
            RepositoryKind::File { extension } => name.extension.as_deref() == Some(extension),
        }
    }

    /// The file names present in the repository directory.
    fn entries(&self) -> BackupResult<Vec<String>> {
        match &self.remote_cmd {
            None => {
                let entries = fs::read_dir(&self.root)
                    .map_err(|err| {
                        RepositoryErrorKind::ListingRepositoryFailed(self.root.clone(), err)
                    })?
                    .filter_map(Result::ok)
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .collect();
                Ok(entries)
            }
            Some(_) => {
                let argv = self.command(&["ls", "-1", path_str(&self.root)?]);
                let output = command::output(&argv, self.stderr_mode())?;
                let output = command::decode(&argv, output)?;
                Ok(output.lines().map(str::to_string).collect())
            }
        }
    }

    /// List all snapshots in this repository, ordered by `(time, generation)`.
    ///
    /// Directory entries that do not parse as snapshot names or do not match
    /// the repository kind are silently ignored.
    pub fn list_all(&self) -> BackupResult<Vec<SnapshotName>> {
        let snapshots = self
            .entries()?
            .iter()
            .filter_map(|entry| entry.parse::<SnapshotName>().ok())
            .filter(|name| self.matches_kind(name))
            .sorted_unstable_by(|a, b| a.cmp(b).then_with(|| a.tag.cmp(&b.tag)))
            .collect_vec();
        Ok(snapshots)
    }

    /// List the snapshots of one subvolume tag, ordered by `(time, generation)`.
    pub fn list(&self, tag: &str) -> BackupResult<Vec<SnapshotName>> {
        let mut snapshots = self.list_all()?;
        snapshots.retain(|name| name.tag == tag);
        Ok(snapshots)
    }

    /// The most recent snapshot of a subvolume tag, if any.
    pub fn latest(&self, tag: &str) -> BackupResult<Option<SnapshotName>> {
        Ok(self.list(tag)?.pop())
    }

    /// The btrfs generation of the subvolume at `path`.
    fn generation(&self, path: &Path) -> BackupResult<u64> {
        let argv = self.command(&[constants::BTRFS, "subvolume", "show", path_str(path)?]);
        let output = command::output(&argv, self.stderr_mode())?;
        let output = command::decode(&argv, output)?;
        output
            .lines()
            .filter_map(|line| line.trim_start().strip_prefix("Generation:"))
            .find_map(|rest| rest.trim().parse().ok())
            .ok_or_else(|| RepositoryErrorKind::ParsingGenerationFailed(path.to_path_buf()).into())
    }

    /// Whether the subvolume contains data not covered by its latest snapshot.
    ///
    /// Compares the btrfs generation of the live subvolume with that of the
    /// snapshot; without a snapshot everything counts as new.
    pub fn has_new_data(
        &self,
        subvolume: &Subvolume,
        latest: Option<&SnapshotName>,
    ) -> BackupResult<bool> {
        let Some(latest) = latest else {
            return Ok(true);
        };
        let live = self.generation(subvolume.path())?;
        let snapshot = self.generation(&self.path_of(latest))?;
        Ok(live > snapshot)
    }

    /// Ensure an up-to-date snapshot of `subvolume` exists in this repository.
    ///
    /// A fresh read-only snapshot is taken only when the subvolume has new
    /// data; otherwise the latest existing snapshot is returned.
    ///
    /// # Errors
    ///
    /// * [`RepositoryErrorKind::SnapshotOnFileRepository`] - If this is a file repository
    pub fn snapshot(&self, subvolume: &Subvolume) -> BackupResult<SnapshotName> {
        if self.is_file_repository() {
            return Err(RepositoryErrorKind::SnapshotOnFileRepository.into());
        }

        let existing = self.list(subvolume.tag())?;
        if let Some(latest) = existing.last() {
            if !self.has_new_data(subvolume, Some(latest))? {
                debug!("snapshot {latest} is up to date");
                return Ok(latest.clone());
            }
        }

        let now = Utc::now();
        let now = now.with_nanosecond(0).unwrap_or(now);
        let generation = SnapshotName::next_generation(&existing, subvolume.tag(), now);
        let name = SnapshotName::new(subvolume.tag(), now, generation, None);

        info!("creating snapshot {name}");
        let argv = self.command(&[
            constants::BTRFS,
            "subvolume",
            "snapshot",
            "-r",
            path_str(subvolume.path())?,
            path_str(&self.path_of(&name))?,
        ]);
        command::run(&argv, self.stderr_mode())?;
        Ok(name)
    }

    /// Flush the filesystem so a subsequent send sees the snapshot on disk.
    pub(crate) fn filesystem_sync(&self) -> BackupResult<()> {
        let argv = self.command(&[constants::BTRFS, "filesystem", "sync", path_str(&self.root)?]);
        command::run(&argv, self.stderr_mode())
    }

    /// The pipeline source serializing `snapshot`, incremental against `parent`.
    pub fn send_stage(
        &self,
        snapshot: &SnapshotName,
        parent: Option<&SnapshotName>,
    ) -> BackupResult<Source> {
        match &self.kind {
            RepositoryKind::File { .. } => Ok(Source::File {
                path: self.path_of(snapshot),
                remote_cmd: self.remote_cmd.clone(),
            }),
            RepositoryKind::Subvolume => {
                let mut argv = vec![constants::BTRFS.to_string(), "send".to_string()];
                if let Some(parent) = parent {
                    // -c on top of -p lets btrfs share data with the clone source
                    let parent = path_str(&self.path_of(parent))?.to_string();
                    argv.extend([
                        "-p".to_string(),
                        parent.clone(),
                        "-c".to_string(),
                        parent,
                    ]);
                }
                argv.push(path_str(&self.path_of(snapshot))?.to_string());
                Ok(Source::Serializer(Stage::new(argv, self.remote_cmd.clone())))
            }
        }
    }

    /// The pipeline sink materializing a snapshot named `name` in this repository.
    pub fn receive_stage(&self, name: &SnapshotName) -> BackupResult<Sink> {
        match &self.kind {
            RepositoryKind::File { .. } => Ok(Sink::File {
                path: self.path_of(name),
                remote_cmd: self.remote_cmd.clone(),
            }),
            RepositoryKind::Subvolume => {
                // the serialized stream carries the snapshot name; receive
                // only needs to know the repository directory
                let argv = vec![
                    constants::BTRFS.to_string(),
                    "receive".to_string(),
                    path_str(&self.root)?.to_string(),
                ];
                Ok(Sink::Deserializer(Stage::new(argv, self.remote_cmd.clone())))
            }
        }
    }

    /// Recreate the live subvolume as a writable snapshot of `name`.
    pub(crate) fn materialize(&self, name: &SnapshotName, subvolume: &Subvolume) -> BackupResult<()> {
        info!(
            "restoring subvolume {} from {name}",
            subvolume.path().display()
        );
        let argv = self.command(&[
            constants::BTRFS,
            "subvolume",
            "snapshot",
            path_str(&self.path_of(name))?,
            path_str(subvolume.path())?,
        ]);
        command::run(&argv, self.stderr_mode())
    }

    /// Delete a single snapshot from the repository.
    fn delete(&self, name: &SnapshotName) -> BackupResult<()> {
        info!("deleting snapshot {name}");
        let path = self.path_of(name);
        let argv = match &self.kind {
            RepositoryKind::Subvolume => self.command(&[
                constants::BTRFS,
                "subvolume",
                "delete",
                path_str(&path)?,
            ]),
            RepositoryKind::File { .. } => self.command(&["rm", "--", path_str(&path)?]),
        };
        command::run(&argv, self.stderr_mode())
    }

    /// Best-effort removal of a half-written snapshot file after a failed transfer.
    pub(crate) fn remove_partial(&self, name: &SnapshotName) {
        if !self.is_file_repository() {
            return;
        }
        let path = self.path_of(name);
        match &self.remote_cmd {
            None => {
                if path.exists() {
                    _ = fs::remove_file(&path);
                }
            }
            Some(_) => {
                let Some(path) = path.to_str() else { return };
                _ = command::run(&self.command(&["rm", "-f", "--", path]), StderrMode::Discard);
            }
        }
    }

    /// Remove over-age snapshots of a subvolume tag from the repository.
    ///
    /// Deletes every snapshot older than `keep_for`, except the most recent
    /// one, which survives unconditionally.
    ///
    /// # Arguments
    ///
    /// * `tag` - The subvolume tag to purge snapshots of
    /// * `keep_for` - How long snapshots are retained
    ///
    /// # Returns
    ///
    /// The snapshots that were deleted.
    pub fn purge(&self, tag: &str, keep_for: Duration) -> BackupResult<Vec<SnapshotName>> {
        let snapshots = self.list(tag)?;
        let expired = snapshots_to_purge(&snapshots, keep_for, Utc::now());
        for name in &expired {
            self.delete(name)?;
        }
        Ok(expired)
    }
}

/// Select the over-age snapshots from an ascending listing.
///
/// The last element, i.e. the most recent snapshot, is never selected.
pub(crate) fn snapshots_to_purge(
    snapshots: &[SnapshotName],
    keep_for: Duration,
    now: DateTime<Utc>,
) -> Vec<SnapshotName> {
    let Some((_, candidates)) = snapshots.split_last() else {
        return Vec::new();
    };
    candidates
        .iter()
        .filter(|snapshot| snapshot.time + keep_for < now)
        .cloned()
        .collect()
}

fn path_str(path: &Path) -> BackupResult<&str> {
    path.to_str()
        .ok_or_else(|| RepositoryErrorKind::NonUnicodePath(path.to_path_buf()).into())
}
