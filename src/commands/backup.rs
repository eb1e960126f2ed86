//! `backup` subcommand

use std::path::PathBuf;

use abscissa_core::{config::Override, Command, FrameworkError, Runnable, Shutdown};
use anyhow::{bail, Result};
use log::{error, info};
use merge::Merge;
use serde::{Deserialize, Serialize};

use btrfs_backup_core::{sync, SyncOptions};

use crate::{
    config::TransferOptions,
    helpers::{parse_duration, resolve_transfer, Direction},
    status_err, Application, BtrfsBackupConfig, BTRFS_BACKUP_APP,
};

/// `backup` subcommand
#[derive(clap::Parser, Command, Debug, Clone, Default, Serialize, Deserialize, Merge)]
#[serde(default, rename_all = "kebab-case")]
pub struct BackupCmd {
    /// The path to the source repository
    #[clap(value_name = "SOURCE-REPO")]
    #[serde(skip)]
    #[merge(skip)]
    src: Option<PathBuf>,

    /// The path to the destination repository
    #[clap(value_name = "DESTINATION-REPO")]
    #[serde(skip)]
    #[merge(skip)]
    dst: Option<PathBuf>,

    /// Duration how long to keep snapshots. Snapshots that are older than
    /// 'duration' will be deleted from the source repository when the next
    /// backup is performed. Valid suffixes are: S (seconds), M (minutes),
    /// H (hours), d (days), w (weeks), m (months), and y (years).
    #[clap(long, value_name = "DURATION")]
    keep_for: Option<String>,

    #[clap(flatten)]
    #[serde(flatten)]
    transfer: TransferOptions,
}

impl Override<BtrfsBackupConfig> for BackupCmd {
    // Process the given command line options, overriding settings from
    // a configuration file using explicit flags taken from command-line
    // arguments.
    fn override_config(
        &self,
        mut config: BtrfsBackupConfig,
    ) -> Result<BtrfsBackupConfig, FrameworkError> {
        let mut self_config = self.clone();
        // merge "backup" section from config file, if given
        self_config.merge(config.backup);
        config.backup = self_config;
        Ok(config)
    }
}

impl Runnable for BackupCmd {
    fn run(&self) {
        if let Err(err) = self.inner_run() {
            status_err!("{}", err);
            BTRFS_BACKUP_APP.shutdown(Shutdown::Crash);
        };
    }
}

impl BackupCmd {
    fn inner_run(&self) -> Result<()> {
        let config = BTRFS_BACKUP_APP.config();
        let cmd = &config.backup;

        let keep_for = cmd.keep_for.as_deref().map(parse_duration).transpose()?;
        let transfer = resolve_transfer(
            cmd.src.as_ref(),
            cmd.dst.as_ref(),
            &cmd.transfer,
            Direction::Backup,
        )?;
        let opts = SyncOptions { keep_for };

        let mut failed = 0_usize;
        for subvolume in &transfer.subvolumes {
            if config.global.dry_run {
                info!(
                    "would sync subvolume {} to {}",
                    subvolume.path().display(),
                    transfer.dst.root().display()
                );
                continue;
            }

            match sync(
                &transfer.src,
                &transfer.dst,
                subvolume,
                &transfer.filters,
                &opts,
            ) {
                Ok(outcome) if outcome.transferred => {
                    info!(
                        "{} synchronized to {}",
                        outcome.snapshot,
                        transfer.dst.root().display()
                    );
                }
                Ok(outcome) => info!("{} is up to date", outcome.snapshot),
                Err(err) => {
                    // keep going; whatever was backed up successfully stays
                    error!("syncing {} failed: {err}", subvolume.path().display());
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            bail!("backup failed for {failed} subvolume(s)");
        }
        Ok(())
    }
}
