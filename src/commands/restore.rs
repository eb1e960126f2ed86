//! `restore` subcommand

use std::path::PathBuf;

use abscissa_core::{config::Override, Command, FrameworkError, Runnable, Shutdown};
use anyhow::{bail, Result};
use log::{error, info};
use merge::Merge;
use serde::{Deserialize, Serialize};

use btrfs_backup_core::{restore, RestoreOptions};

use crate::{
    config::TransferOptions,
    helpers::{resolve_transfer, Direction},
    status_err, Application, BtrfsBackupConfig, BTRFS_BACKUP_APP,
};

/// `restore` subcommand
#[derive(clap::Parser, Command, Debug, Clone, Default, Serialize, Deserialize, Merge)]
#[serde(default, rename_all = "kebab-case")]
pub struct RestoreCmd {
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

    /// Restore only snapshots, not the entire source subvolume.
    #[clap(long)]
    #[merge(strategy = merge::bool::overwrite_false)]
    snapshots_only: bool,

    #[clap(flatten)]
    #[serde(flatten)]
    transfer: TransferOptions,
}

impl Override<BtrfsBackupConfig> for RestoreCmd {
    // Process the given command line options, overriding settings from
    // a configuration file using explicit flags taken from command-line
    // arguments.
    fn override_config(
        &self,
        mut config: BtrfsBackupConfig,
    ) -> Result<BtrfsBackupConfig, FrameworkError> {
        let mut self_config = self.clone();
        // merge "restore" section from config file, if given
        self_config.merge(config.restore);
        config.restore = self_config;
        Ok(config)
    }
}

impl Runnable for RestoreCmd {
    fn run(&self) {
        if let Err(err) = self.inner_run() {
            status_err!("{}", err);
            BTRFS_BACKUP_APP.shutdown(Shutdown::Crash);
        };
    }
}

impl RestoreCmd {
    fn inner_run(&self) -> Result<()> {
        let config = BTRFS_BACKUP_APP.config();
        let cmd = &config.restore;

        let transfer = resolve_transfer(
            cmd.src.as_ref(),
            cmd.dst.as_ref(),
            &cmd.transfer,
            Direction::Restore {
                snapshots_only: cmd.snapshots_only,
            },
        )?;
        let opts = RestoreOptions {
            snapshots_only: cmd.snapshots_only,
        };

        let mut failed = 0_usize;
        for subvolume in &transfer.subvolumes {
            if config.global.dry_run {
                info!(
                    "would restore subvolume {} from {}",
                    subvolume.path().display(),
                    transfer.src.root().display()
                );
                continue;
            }

            match restore(
                &transfer.src,
                &transfer.dst,
                subvolume,
                &transfer.filters,
                &opts,
            ) {
                Ok(snapshot) => {
                    info!(
                        "{snapshot} restored into {}",
                        transfer.dst.root().display()
                    );
                }
                Err(err) => {
                    error!("restoring {} failed: {err}", subvolume.path().display());
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            bail!("restore failed for {failed} subvolume(s)");
        }
        Ok(())
    }
}
