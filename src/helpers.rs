//! Helpers for the command-line frontend: argument resolution, duration
//! parsing and table output.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use chrono::Duration;
use comfy_table::{
    presets::ASCII_MARKDOWN, Attribute, Cell, ContentArrangement, Table,
};

use btrfs_backup_core::{Filters, Repository, RepositoryOptions, Subvolume};

use crate::config::TransferOptions;

/// The placeholder marking the filter that reads or writes snapshot files.
const FILE_PLACEHOLDER: &str = "{file}";

/// The direction of a transfer.
///
/// Decides which of the two repositories is the archive side, i.e. the one
/// carrying the remote command prefix and the snapshot file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    /// Snapshots flow from the local side to the archive.
    Backup,
    /// Snapshots flow from the archive back to the local side.
    Restore {
        /// Only the snapshots come back, not the live subvolume.
        snapshots_only: bool,
    },
}

/// The resolved pieces of a backup or restore invocation.
#[derive(Debug)]
pub(crate) struct Transfer {
    pub(crate) src: Repository,
    pub(crate) dst: Repository,
    pub(crate) subvolumes: Vec<Subvolume>,
    pub(crate) filters: Filters,
}

/// Resolve the command line of a transfer into repositories, subvolumes and
/// filters, validating the configuration on the way.
pub(crate) fn resolve_transfer(
    src: Option<&PathBuf>,
    dst: Option<&PathBuf>,
    opts: &TransferOptions,
    direction: Direction,
) -> Result<Transfer> {
    let mut src = src
        .ok_or_else(|| anyhow!("no source repository given"))?
        .clone();
    let mut dst = dst
        .ok_or_else(|| anyhow!("no destination repository given"))?
        .clone();

    let mut send_filters = split_commands(&opts.send_filters, "send filter")?;
    let mut recv_filters = split_commands(&opts.recv_filters, "receive filter")?;

    if opts.reverse {
        std::mem::swap(&mut src, &mut dst);
        std::mem::swap(&mut send_filters, &mut recv_filters);
    }

    if opts.subvolumes.is_empty() {
        bail!("no subvolume given, use --subvolume");
    }
    let subvolumes = opts
        .subvolumes
        .iter()
        .map(Subvolume::new)
        .collect::<btrfs_backup_core::BackupResult<Vec<_>>>()?;

    check_file_placeholder(&send_filters, &recv_filters, opts.snapshot_ext.is_some(), direction)?;

    // a snapshot file can only become a subvolume again if the receive
    // filters rebuild the serialized stream from it
    if let Direction::Restore { snapshots_only } = direction {
        if !snapshots_only && opts.snapshot_ext.is_some() && recv_filters.is_empty() {
            bail!(
                "restoring a live subvolume from a file repository needs \
                 receive filters or --snapshots-only"
            );
        }
    }

    let remote_cmd = opts
        .remote_cmd
        .as_deref()
        .map(|command| split_command(command, "remote command"))
        .transpose()?;

    let read_stderr = !opts.no_read_stderr;
    let local = RepositoryOptions {
        read_stderr,
        ..Default::default()
    };
    let archive = RepositoryOptions {
        remote_cmd,
        snapshot_ext: opts.snapshot_ext.clone(),
        read_stderr,
    };

    let (src, dst) = match direction {
        Direction::Backup => (Repository::open(src, local)?, Repository::open(dst, archive)?),
        Direction::Restore { .. } => {
            (Repository::open(src, archive)?, Repository::open(dst, local)?)
        }
    };

    Ok(Transfer {
        src,
        dst,
        subvolumes,
        filters: Filters {
            send: send_filters,
            recv: recv_filters,
        },
    })
}

/// Validate the position of the `{file}` placeholder in the filter chains.
///
/// With a snapshot extension the designated filter (the last receive filter
/// on backup, the first send filter on restore) must carry the placeholder;
/// everywhere else it is refused.
fn check_file_placeholder(
    send_filters: &[Vec<String>],
    recv_filters: &[Vec<String>],
    file_repository: bool,
    direction: Direction,
) -> Result<()> {
    let contains = |filter: &Vec<String>| filter.iter().any(|arg| arg.contains(FILE_PLACEHOLDER));

    let designated: Option<usize> = if !file_repository {
        None
    } else {
        match direction {
            Direction::Backup => {
                if recv_filters.is_empty() {
                    bail!("--snapshot-ext must be used in conjunction with --recv-filter");
                }
                if !contains(&recv_filters[recv_filters.len() - 1]) {
                    bail!("the last receive filter must contain the \"{{file}}\" string");
                }
                Some(send_filters.len() + recv_filters.len() - 1)
            }
            Direction::Restore { .. } => {
                if send_filters.is_empty() {
                    bail!("--snapshot-ext must be used in conjunction with --send-filter");
                }
                if !contains(&send_filters[0]) {
                    bail!("the first send filter must contain the \"{{file}}\" string");
                }
                Some(0)
            }
        }
    };

    for (index, filter) in send_filters.iter().chain(recv_filters.iter()).enumerate() {
        if Some(index) != designated && contains(filter) {
            bail!(
                "the \"{{file}}\" string is only allowed in the filter interacting \
                 with the snapshot file of a file repository"
            );
        }
    }
    Ok(())
}

/// Split a filter or remote command string into an argument vector.
///
/// The command has to name its program with an absolute path.
fn split_command(command: &str, what: &str) -> Result<Vec<String>> {
    let argv = shell_words::split(command)
        .map_err(|err| anyhow!("invalid {what} `{command}`: {err}"))?;
    let Some(program) = argv.first() else {
        bail!("empty {what}");
    };
    if !Path::new(program).is_absolute() {
        bail!("{what} must be given with an absolute path: `{program}`");
    }
    Ok(argv)
}

fn split_commands(commands: &[String], what: &str) -> Result<Vec<Vec<String>>> {
    commands
        .iter()
        .map(|command| split_command(command, what))
        .collect()
}

/// Create a duration from a duration string.
///
/// A duration is an amount (a positive number) along with a suffix: S
/// (seconds), M (minutes), H (hours), d (days), w (weeks), m (months, i.e.
/// 30 days), and y (years, i.e. 365 days).
pub(crate) fn parse_duration(string: &str) -> Result<Duration> {
    let invalid = || anyhow!("invalid duration string: `{string}`");

    if string.len() < 2 || !string.is_ascii() {
        return Err(invalid());
    }
    let (amount, suffix) = string.split_at(string.len() - 1);
    let seconds = match suffix {
        "S" => 1,
        "M" => 60,
        "H" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        "m" => 2_592_000,
        "y" => 31_536_000,
        _ => return Err(invalid()),
    };

    if amount.starts_with('0') || !amount.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount: i64 = amount.parse().map_err(|_| invalid())?;

    Ok(Duration::seconds(amount * seconds))
}

/// Helpers for table output

pub fn bold_cell<T: ToString>(s: T) -> Cell {
    Cell::new(s).add_attribute(Attribute::Bold)
}

#[must_use]
pub fn table() -> Table {
    let mut table = Table::new();
    _ = table
        .load_preset(ASCII_MARKDOWN)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn table_with_titles<I: IntoIterator<Item = T>, T: ToString>(titles: I) -> Table {
    let mut table = table();
    _ = table.set_header(titles.into_iter().map(bold_cell));
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_follow_the_suffix_table() {
        assert_eq!(parse_duration("1S").unwrap(), Duration::seconds(1));
        assert_eq!(parse_duration("5M").unwrap(), Duration::minutes(5));
        assert_eq!(parse_duration("2H").unwrap(), Duration::hours(2));
        assert_eq!(parse_duration("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_duration("3w").unwrap(), Duration::weeks(3));
        assert_eq!(parse_duration("1m").unwrap(), Duration::days(30));
        assert_eq!(parse_duration("2y").unwrap(), Duration::days(2 * 365));
    }

    #[test]
    fn invalid_durations_are_rejected() {
        for string in ["", "1", "d", "01d", "-1d", "1.5d", "1D", "1 d", "déjàd"] {
            assert!(parse_duration(string).is_err(), "{string}");
        }
    }

    #[test]
    fn commands_must_be_absolute() {
        assert_eq!(
            split_command("/usr/bin/ssh server", "remote command").unwrap(),
            ["/usr/bin/ssh", "server"]
        );
        assert!(split_command("ssh server", "remote command").is_err());
        assert!(split_command("", "remote command").is_err());
        assert!(split_command("/usr/bin/ssh 'unterminated", "remote command").is_err());
    }

    #[test]
    fn quoted_filter_arguments_stay_together() {
        assert_eq!(
            split_command("/usr/bin/gpg --encrypt -r 'Some User'", "send filter").unwrap(),
            ["/usr/bin/gpg", "--encrypt", "-r", "Some User"]
        );
    }

    #[test]
    fn the_placeholder_is_tied_to_the_designated_filter() {
        let restore = Direction::Restore {
            snapshots_only: false,
        };
        let plain = vec![vec!["/bin/cat".to_string()]];
        let with_file = vec![vec!["/bin/dd".to_string(), "of={file}".to_string()]];

        // backup into a file repository wants it in the last receive filter
        check_file_placeholder(&[], &with_file, true, Direction::Backup).unwrap();
        assert!(check_file_placeholder(&[], &plain, true, Direction::Backup).is_err());
        assert!(check_file_placeholder(&[], &[], true, Direction::Backup).is_err());

        // restore from a file repository wants it in the first send filter
        check_file_placeholder(&with_file, &[], true, restore).unwrap();
        assert!(check_file_placeholder(&plain, &[], true, restore).is_err());

        // without a file repository the placeholder is refused anywhere
        check_file_placeholder(&plain, &plain, false, Direction::Backup).unwrap();
        assert!(check_file_placeholder(&with_file, &plain, false, Direction::Backup).is_err());
        assert!(check_file_placeholder(&plain, &with_file, false, restore).is_err());
    }

    #[test]
    fn live_restore_from_a_file_repository_is_refused_up_front() {
        let opts = TransferOptions {
            subvolumes: vec!["/tmp/sv".into()],
            snapshot_ext: Some("gpg".to_string()),
            send_filters: vec!["/bin/cat {file}".to_string()],
            ..Default::default()
        };
        let src = PathBuf::from("/tmp/backup");
        let dst = PathBuf::from("/tmp/snapshots");

        let err = resolve_transfer(
            Some(&src),
            Some(&dst),
            &opts,
            Direction::Restore {
                snapshots_only: false,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("--snapshots-only"), "{err}");

        // with --snapshots-only nothing is materialized and the same
        // invocation resolves
        _ = resolve_transfer(
            Some(&src),
            Some(&dst),
            &opts,
            Direction::Restore {
                snapshots_only: true,
            },
        )
        .unwrap();

        // receive filters make the live restore possible again
        let opts = TransferOptions {
            recv_filters: vec!["/usr/bin/gpg --decrypt".to_string()],
            ..opts
        };
        _ = resolve_transfer(
            Some(&src),
            Some(&dst),
            &opts,
            Direction::Restore {
                snapshots_only: false,
            },
        )
        .unwrap();
    }
}
