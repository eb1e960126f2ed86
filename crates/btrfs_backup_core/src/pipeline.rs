//! Building and running transfer pipelines.
//!
//! A transfer moves a serialized snapshot from a source repository to a
//! destination repository through a chain of processes: the serializer
//! (`btrfs send` or a filter reading a snapshot file), any number of send
//! filters, any number of receive filters, and the sink (`btrfs receive` or a
//! filter writing a snapshot file). Adjacent stages are connected by an
//! anonymous pipe. The decision which stages run behind the remote command
//! wrapper is made here and nowhere else.

use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Child, ExitStatus, Stdio},
};

use log::debug;

use crate::{
    command::{self, StderrMode},
    error::{BackupResult, CommandErrorKind, PipelineErrorKind, SnapshotErrorKind},
};

/// The placeholder in a filter command which is replaced by the snapshot file path.
pub(crate) const FILE_PLACEHOLDER: &str = "{file}";

/// A single stage of a transfer pipeline.
#[derive(Clone, Debug)]
pub struct Stage {
    argv: Vec<String>,
    remote_cmd: Option<Vec<String>>,
}

impl Stage {
    pub(crate) fn new(argv: Vec<String>, remote_cmd: Option<Vec<String>>) -> Self {
        Self { argv, remote_cmd }
    }

    pub(crate) fn local(argv: Vec<String>) -> Self {
        Self::new(argv, None)
    }

    /// The argument vector actually spawned, with the remote prefix applied.
    fn spawn_argv(&self) -> Vec<String> {
        match &self.remote_cmd {
            Some(prefix) => prefix.iter().chain(self.argv.iter()).cloned().collect(),
            None => self.argv.clone(),
        }
    }
}

/// Where the serialized snapshot stream originates.
#[derive(Clone, Debug)]
pub enum Source {
    /// A command producing the stream on stdout, e.g. `btrfs send`.
    Serializer(Stage),
    /// A snapshot file of a file repository, read by the first send filter.
    File {
        /// the absolute path of the snapshot file
        path: PathBuf,
        /// the remote prefix of the repository holding the file
        remote_cmd: Option<Vec<String>>,
    },
}

/// Where the serialized snapshot stream ends up.
#[derive(Clone, Debug)]
pub enum Sink {
    /// A command consuming the stream on stdin, e.g. `btrfs receive`.
    Deserializer(Stage),
    /// A snapshot file of a file repository, written by the last receive filter.
    File {
        /// the absolute path of the snapshot file
        path: PathBuf,
        /// the remote prefix of the repository holding the file
        remote_cmd: Option<Vec<String>>,
    },
}

/// Compose source, filters and sink into the ordered list of pipeline stages.
///
/// User filters always run locally; only the repository ends of the pipeline
/// cross over to the remote side. For file repositories the designated filter
/// takes the place of the serializer or deserializer and its `{file}`
/// placeholder is substituted with the snapshot file path.
///
/// # Errors
///
/// * [`PipelineErrorKind::MissingFilePlaceholder`] - If a file repository is used
///   but no filter carries the placeholder
pub(crate) fn assemble(
    source: Source,
    send_filters: &[Vec<String>],
    recv_filters: &[Vec<String>],
    sink: Sink,
) -> BackupResult<Vec<Stage>> {
    let mut stages = Vec::with_capacity(send_filters.len() + recv_filters.len() + 2);

    match source {
        Source::Serializer(stage) => {
            stages.push(stage);
            stages.extend(send_filters.iter().cloned().map(Stage::local));
        }
        Source::File { path, remote_cmd } => {
            let (first, rest) = send_filters
                .split_first()
                .ok_or(PipelineErrorKind::MissingFilePlaceholder)?;
            stages.push(Stage::new(substitute_file(first, &path)?, remote_cmd));
            stages.extend(rest.iter().cloned().map(Stage::local));
        }
    }

    match sink {
        Sink::Deserializer(stage) => {
            stages.extend(recv_filters.iter().cloned().map(Stage::local));
            stages.push(stage);
        }
        Sink::File { path, remote_cmd } => {
            let (last, rest) = recv_filters
                .split_last()
                .ok_or(PipelineErrorKind::MissingFilePlaceholder)?;
            stages.extend(rest.iter().cloned().map(Stage::local));
            stages.push(Stage::new(substitute_file(last, &path)?, remote_cmd));
        }
    }

    Ok(stages)
}

/// Replace the `{file}` placeholder in `argv` with the given path.
fn substitute_file(argv: &[String], path: &Path) -> BackupResult<Vec<String>> {
    let path = path
        .to_str()
        .ok_or_else(|| SnapshotErrorKind::NonUnicodePath(path.to_path_buf()))?;

    let mut argv = argv.to_vec();
    for arg in &mut argv {
        if arg.contains(FILE_PLACEHOLDER) {
            *arg = arg.replace(FILE_PLACEHOLDER, path);
            return Ok(argv);
        }
    }
    Err(PipelineErrorKind::MissingFilePlaceholder.into())
}

/// A spawned pipeline stage.
///
/// The drop guard terminates and reaps the child on error paths; stages that
/// ran to completion have been reaped by [`Pipeline::wait`] already, making
/// the guard a no-op.
#[derive(Debug)]
struct SpawnedStage {
    argv: Vec<String>,
    child: Child,
}

impl Drop for SpawnedStage {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            debug!("terminating stage `{}`", command::display(&self.argv));
            _ = self.child.kill();
            _ = self.child.wait();
        }
    }
}

/// A running transfer pipeline.
#[derive(Debug)]
pub(crate) struct Pipeline {
    stages: Vec<SpawnedStage>,
    stderr: StderrMode,
}

impl Pipeline {
    /// Spawn all stages in forward order, connecting adjacent ones with a pipe.
    ///
    /// The write end of each pipe is moved into the successor when it is
    /// spawned, so no descriptor stays behind in this process and EOF
    /// propagates once the source is done.
    pub(crate) fn spawn(stages: &[Stage], stderr: StderrMode) -> BackupResult<Self> {
        if stages.is_empty() {
            return Err(PipelineErrorKind::EmptyPipeline.into());
        }

        let mut spawned: Vec<SpawnedStage> = Vec::with_capacity(stages.len());
        let last = stages.len() - 1;

        for (i, stage) in stages.iter().enumerate() {
            match Self::spawn_stage(stage, i == last, spawned.last_mut(), stderr) {
                Ok(child) => spawned.push(child),
                Err(err) => {
                    // tear the already-spawned prefix down in reverse spawn
                    // order before surfacing the error
                    teardown(&mut spawned);
                    return Err(err);
                }
            }
        }

        Ok(Self {
            stages: spawned,
            stderr,
        })
    }

    /// Spawn a single stage, with its stdin wired to the previous stage.
    fn spawn_stage(
        stage: &Stage,
        is_last: bool,
        previous: Option<&mut SpawnedStage>,
        stderr: StderrMode,
    ) -> BackupResult<SpawnedStage> {
        let argv = stage.spawn_argv();
        let mut command = command::command(&argv)?;

        match previous {
            None => {
                _ = command.stdin(Stdio::null());
            }
            Some(previous) => {
                let stdout = previous.child.stdout.take().ok_or_else(|| {
                    PipelineErrorKind::StdoutNotCaptured(command::display(&previous.argv))
                })?;
                _ = command.stdin(Stdio::from(stdout));
            }
        }

        let stdout = if is_last {
            Stdio::inherit()
        } else {
            Stdio::piped()
        };

        debug!("spawning stage `{}`", command::display(&argv));
        let child = command
            .stdout(stdout)
            .stderr(stderr.to_stdio())
            .spawn()
            .map_err(|err| CommandErrorKind::SpawningCommandFailed {
                command: command::display(&argv),
                source: err,
            })?;

        Ok(SpawnedStage { argv, child })
    }

    /// Await all stages in reverse spawn order.
    ///
    /// The pipeline is successful iff every stage exited with code zero. On
    /// failure the first offending stage in pipeline order is reported with
    /// its argument vector, exit status and captured stderr.
    pub(crate) fn wait(mut self) -> BackupResult<()> {
        let mut results: Vec<(String, ExitStatus, String)> = Vec::with_capacity(self.stages.len());

        for stage in self.stages.iter_mut().rev() {
            // stderr is drained before waiting so the stage cannot block on a
            // full pipe while shutting down
            let mut stderr = String::new();
            if self.stderr == StderrMode::Capture {
                if let Some(mut pipe) = stage.child.stderr.take() {
                    _ = pipe.read_to_string(&mut stderr);
                }
            }

            let status = stage.child.wait().map_err(|err| {
                CommandErrorKind::WaitingForCommandFailed {
                    command: command::display(&stage.argv),
                    source: err,
                }
            })?;

            results.push((
                command::display(&stage.argv),
                status,
                stderr.trim_end().to_string(),
            ));
        }

        results.reverse();

        match results.into_iter().find(|(_, status, _)| !status.success()) {
            Some((command, status, stderr)) => Err(PipelineErrorKind::StageNotSuccessful {
                command,
                status,
                stderr,
            }
            .into()),
            None => Ok(()),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        teardown(&mut self.stages);
    }
}

/// Release spawned stages in reverse spawn order.
///
/// A `Vec` drops its elements front to back, which would terminate the
/// source before its consumers; popping enforces the LIFO order the regular
/// await path uses as well.
fn teardown(stages: &mut Vec<SpawnedStage>) {
    while let Some(stage) = stages.pop() {
        drop(stage);
    }
}

/// Spawn and await a pipeline built from the given stages.
pub(crate) fn run(stages: &[Stage], stderr: StderrMode) -> BackupResult<()> {
    Pipeline::spawn(stages, stderr)?.wait()
}
