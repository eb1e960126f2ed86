//! Execution of single external commands.
//!
//! Everything btrfs-backup does to the outside world happens through external
//! programs: `btrfs` itself, `ls` on remote repository roots, the user
//! supplied filters and the remote command wrapper. This module spawns one
//! command at a time; chains of commands are handled by [`crate::pipeline`].

use std::process::{Command, Stdio};

use log::debug;

use crate::error::{BackupResult, CommandErrorKind};

/// How stderr of a spawned command is treated.
///
/// Reading stderr couples our lifetime to the stderr handle of every child.
/// Remote command wrappers like ssh with `ControlPersist` fork a background
/// process which keeps stderr open long after the actual command finished,
/// which would block us indefinitely. [`StderrMode::apply_policy`] exists to
/// degrade capturing when the user asked for `--no-read-stderr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StderrMode {
    /// Collect stderr and include it in error messages.
    Capture,
    /// Pass stderr through to our own stderr.
    Inherit,
    /// Throw stderr away; only exit codes discriminate failures.
    Discard,
}

impl StderrMode {
    /// Degrade a capture request to discarding when stderr must not be read.
    #[must_use]
    pub fn apply_policy(self, read_stderr: bool) -> Self {
        match self {
            Self::Capture if !read_stderr => Self::Discard,
            mode => mode,
        }
    }

    pub(crate) fn to_stdio(self) -> Stdio {
        match self {
            Self::Capture => Stdio::piped(),
            Self::Inherit => Stdio::inherit(),
            Self::Discard => Stdio::null(),
        }
    }
}

/// Join an argument vector for display in log and error messages.
pub(crate) fn display(argv: &[String]) -> String {
    argv.join(" ")
}

/// Turn an argument vector into a [`Command`], failing on an empty one.
pub(crate) fn command(argv: &[String]) -> BackupResult<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or(CommandErrorKind::EmptyCommand)?;
    let mut command = Command::new(program);
    _ = command.args(args);
    Ok(command)
}

/// Run a command to completion, discarding its stdout.
///
/// # Errors
///
/// * [`CommandErrorKind::SpawningCommandFailed`] - If the command could not be started
/// * [`CommandErrorKind::CommandNotSuccessful`] - If the command exited non-zero
pub fn run(argv: &[String], stderr: StderrMode) -> BackupResult<()> {
    _ = execute(argv, Stdio::null(), stderr)?;
    Ok(())
}

/// Run a command to completion and return its captured stdout.
///
/// # Errors
///
/// * [`CommandErrorKind::SpawningCommandFailed`] - If the command could not be started
/// * [`CommandErrorKind::CommandNotSuccessful`] - If the command exited non-zero
pub fn output(argv: &[String], stderr: StderrMode) -> BackupResult<Vec<u8>> {
    execute(argv, Stdio::piped(), stderr)
}

fn execute(argv: &[String], stdout: Stdio, stderr: StderrMode) -> BackupResult<Vec<u8>> {
    debug!("running `{}`", display(argv));
    let output = command(argv)?
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr.to_stdio())
        .output()
        .map_err(|err| CommandErrorKind::SpawningCommandFailed {
            command: display(argv),
            source: err,
        })?;

    if !output.status.success() {
        return Err(CommandErrorKind::CommandNotSuccessful {
            command: display(argv),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        }
        .into());
    }

    Ok(output.stdout)
}

/// Decode command output which is expected to be text, e.g. a directory listing.
pub(crate) fn decode(argv: &[String], output: Vec<u8>) -> BackupResult<String> {
    String::from_utf8(output).map_err(|_| {
        CommandErrorKind::NonUnicodeOutput {
            command: display(argv),
        }
        .into()
    })
}
