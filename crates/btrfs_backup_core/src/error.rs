//! Error types and Result module.

use std::{num::ParseIntError, path::PathBuf, process::ExitStatus};

use displaydoc::Display;
use thiserror::Error;

/// Result type that is being returned from methods that can fail and thus have [`BackupError`]s.
pub type BackupResult<T> = Result<T, BackupError>;

// [`BackupError`] is public, but opaque and easy to keep compatible.
#[derive(Error, Debug)]
#[error(transparent)]
/// Errors that can result from btrfs-backup.
pub struct BackupError(#[from] BackupErrorKind);

// Accessors for anything we do want to expose publicly.
impl BackupError {
    /// Expose the inner error kind.
    ///
    /// This is useful for matching on the error kind.
    pub fn into_inner(self) -> BackupErrorKind {
        self.0
    }
}

/// [`BackupErrorKind`] describes the errors that can happen while synchronizing repositories.
///
/// This is a non-exhaustive enum, so additional variants may be added in future. It is
/// recommended to match against the wildcard `_` instead of listing all possible variants,
/// to avoid problems when new variants are added.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BackupErrorKind {
    /// [`CommandErrorKind`] describes the errors that can happen while executing an external command
    #[error(transparent)]
    Command(#[from] CommandErrorKind),

    /// [`PipelineErrorKind`] describes the errors that can happen while building or running a transfer pipeline
    #[error(transparent)]
    Pipeline(#[from] PipelineErrorKind),

    /// [`SnapshotErrorKind`] describes the errors that can be returned by processing snapshot names
    #[error(transparent)]
    Snapshot(#[from] SnapshotErrorKind),

    /// [`RepositoryErrorKind`] describes the errors that can be returned by processing repositories
    #[error(transparent)]
    Repository(#[from] RepositoryErrorKind),

    /// [`SyncErrorKind`] describes the errors that can be returned by the sync engine
    #[error(transparent)]
    Sync(#[from] SyncErrorKind),

    /// [`std::io::Error`]
    #[error(transparent)]
    StdIo(#[from] std::io::Error),
}

/// [`CommandErrorKind`] describes the errors that can happen while executing an external command
#[derive(Error, Debug, Display)]
pub enum CommandErrorKind {
    /// refusing to run an empty command line
    EmptyCommand,
    /// spawning `{command}` failed: {source}
    SpawningCommandFailed {
        /// the command line that could not be spawned
        command: String,
        /// the underlying io error
        source: std::io::Error,
    },
    /// waiting for `{command}` failed: {source}
    WaitingForCommandFailed {
        /// the command line that was being awaited
        command: String,
        /// the underlying io error
        source: std::io::Error,
    },
    /// `{command}` failed with {status}: {stderr}
    CommandNotSuccessful {
        /// the command line that failed
        command: String,
        /// the exit status reported for it
        status: ExitStatus,
        /// captured stderr, empty when stderr was not read
        stderr: String,
    },
    /// output of `{command}` is not valid unicode
    NonUnicodeOutput {
        /// the command line whose output could not be decoded
        command: String,
    },
}

/// [`PipelineErrorKind`] describes the errors that can happen while building or running a transfer pipeline
#[derive(Error, Debug, Display)]
pub enum PipelineErrorKind {
    /// refusing to run an empty pipeline
    EmptyPipeline,
    /// stage `{0}` did not expose a readable stdout
    StdoutNotCaptured(String),
    /// a file repository needs a filter containing the "{{file}}" placeholder
    MissingFilePlaceholder,
    /// filter command must be given with an absolute path: `{0}`
    FilterNotAbsolute(String),
    /// stage `{command}` exited with {status}: {stderr}
    StageNotSuccessful {
        /// the command line of the offending stage
        command: String,
        /// the exit status reported for it
        status: ExitStatus,
        /// captured stderr, empty when stderr was not read
        stderr: String,
    },
}

/// [`SnapshotErrorKind`] describes the errors that can be returned by processing snapshot names
#[derive(Error, Debug, Display)]
pub enum SnapshotErrorKind {
    /// invalid snapshot name `{0}`
    InvalidName(String),
    /// invalid timestamp in snapshot name `{0}`: {1}
    InvalidTimestamp(String, chrono::ParseError),
    /// invalid generation in snapshot name `{0}`: {1}
    InvalidGeneration(String, ParseIntError),
    /// subvolume path {0:?} has no base name
    NoBaseName(PathBuf),
    /// non-unicode subvolume path {0:?}
    NonUnicodePath(PathBuf),
}

/// [`RepositoryErrorKind`] describes the errors that can be returned by processing repositories
#[derive(Error, Debug, Display)]
pub enum RepositoryErrorKind {
    /// snapshot extension must not start with a dot: `{0}`
    ExtensionStartsWithDot(String),
    /// remote command must be given with an absolute path: `{0}`
    RemoteCommandNotAbsolute(String),
    /// file repositories cannot take snapshots of a subvolume
    SnapshotOnFileRepository,
    /// listing repository {0:?} failed: {1}
    ListingRepositoryFailed(PathBuf, std::io::Error),
    /// cannot determine the btrfs generation of {0:?}
    ParsingGenerationFailed(PathBuf),
    /// non-unicode repository path {0:?}
    NonUnicodePath(PathBuf),
}

/// [`SyncErrorKind`] describes the errors that can be returned by the sync engine
#[derive(Error, Debug, Display)]
pub enum SyncErrorKind {
    /// no snapshot to restore found for subvolume `{tag}` in {repo:?}
    NoSnapshotToRestore {
        /// the tag of the subvolume that was to be restored
        tag: String,
        /// the root of the repository that was searched
        repo: PathBuf,
    },
    /// cannot restore subvolume {0:?}: a directory with this name exists
    SubvolumeExists(PathBuf),
}

trait BackupErrorMarker: std::error::Error {}

impl BackupErrorMarker for CommandErrorKind {}
impl BackupErrorMarker for PipelineErrorKind {}
impl BackupErrorMarker for SnapshotErrorKind {}
impl BackupErrorMarker for RepositoryErrorKind {}
impl BackupErrorMarker for SyncErrorKind {}
impl BackupErrorMarker for std::io::Error {}

impl<E> From<E> for BackupError
where
    E: BackupErrorMarker,
    BackupErrorKind: From<E>,
{
    fn from(value: E) -> Self {
        Self(BackupErrorKind::from(value))
    }
}
