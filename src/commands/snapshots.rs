//! `snapshots` subcommand

use std::path::PathBuf;

use abscissa_core::{Command, Runnable, Shutdown};
use anyhow::{anyhow, Result};

use btrfs_backup_core::{Repository, RepositoryOptions};

use crate::{
    helpers::table_with_titles, status_err, Application, BTRFS_BACKUP_APP,
};

/// `snapshots` subcommand
#[derive(clap::Parser, Command, Debug)]
pub(crate) struct SnapshotsCmd {
    /// The path to the repository
    #[clap(value_name = "REPO")]
    repo: Option<PathBuf>,

    /// Only show snapshots of the subvolume with this tag
    #[clap(short = 's', long, value_name = "TAG")]
    tag: Option<String>,

    /// Extension of snapshot files; treats the repository as a file repository
    #[clap(long, value_name = "EXTENSION")]
    snapshot_ext: Option<String>,

    /// The command to use for listing a repository on a remote site
    #[clap(long, value_name = "COMMAND")]
    remote_cmd: Option<String>,

    /// Turn off reading of data from stderr of spawned commands
    #[clap(long)]
    no_read_stderr: bool,
}

impl Runnable for SnapshotsCmd {
    fn run(&self) {
        if let Err(err) = self.inner_run() {
            status_err!("{}", err);
            BTRFS_BACKUP_APP.shutdown(Shutdown::Crash);
        };
    }
}

impl SnapshotsCmd {
    fn inner_run(&self) -> Result<()> {
        let repo = self
            .repo
            .as_ref()
            .ok_or_else(|| anyhow!("no repository given"))?;

        let remote_cmd = self
            .remote_cmd
            .as_deref()
            .map(shell_words::split)
            .transpose()?;
        let repository = Repository::open(
            repo,
            RepositoryOptions {
                remote_cmd,
                snapshot_ext: self.snapshot_ext.clone(),
                read_stderr: !self.no_read_stderr,
            },
        )?;

        let mut snapshots = repository.list_all()?;
        if let Some(tag) = &self.tag {
            snapshots.retain(|snapshot| &snapshot.tag == tag);
        }

        let mut table = table_with_titles(["Snapshot", "Subvolume", "Time", "Gen"]);
        for snapshot in &snapshots {
            _ = table.add_row([
                &snapshot.to_string(),
                &snapshot.tag,
                &snapshot.time.format("%Y-%m-%d %H:%M:%S").to_string(),
                &snapshot.generation.to_string(),
            ]);
        }
        println!("{table}");
        println!("total: {} snapshot(s)", snapshots.len());

        Ok(())
    }
}
