//! btrfs-backup Subcommands

pub(crate) mod backup;
pub(crate) mod completions;
pub(crate) mod restore;
pub(crate) mod snapshots;

use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;

use crate::{
    commands::{
        backup::BackupCmd, completions::CompletionsCmd, restore::RestoreCmd,
        snapshots::SnapshotsCmd,
    },
    config::BtrfsBackupConfig,
    {Application, BTRFS_BACKUP_APP},
};

use abscissa_core::{
    config::Override, terminal::ColorChoice, Command, Configurable, FrameworkError,
    FrameworkErrorKind, Runnable, Shutdown,
};
use clap::builder::{
    styling::{AnsiColor, Effects},
    Styles,
};
use log::{log, Level};
use simplelog::{CombinedLogger, LevelFilter, TermLogger, TerminalMode, WriteLogger};

/// btrfs-backup Subcommands
/// Subcommands need to be listed in an enum.
#[derive(clap::Parser, Command, Debug, Runnable)]
enum BtrfsBackupCmd {
    /// Backup one or more subvolumes to a repository
    Backup(BackupCmd),

    /// Restore subvolumes or snapshots from a repository
    Restore(RestoreCmd),

    /// Show an overview of the snapshots within a repository
    Snapshots(SnapshotsCmd),

    /// Generate shell completions
    Completions(CompletionsCmd),
}

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Red.on_default() | Effects::BOLD)
        .usage(AnsiColor::Red.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
}

/// Entry point for the application. It needs to be a struct to allow using subcommands!
#[derive(clap::Parser, Command, Debug)]
#[command(author, about, name = "btrfs-backup", styles = styles(), version)]
pub struct EntryPoint {
    #[command(flatten)]
    pub config: BtrfsBackupConfig,

    #[command(subcommand)]
    commands: BtrfsBackupCmd,
}

impl Runnable for EntryPoint {
    fn run(&self) {
        self.commands.run();
        BTRFS_BACKUP_APP.shutdown(Shutdown::Graceful)
    }
}

/// This trait allows you to define how application configuration is loaded.
impl Configurable<BtrfsBackupConfig> for EntryPoint {
    /// Location of the configuration file
    fn config_path(&self) -> Option<PathBuf> {
        // The config is not loaded from a fixed path but merged from
        // profiles in process_config(), so none is returned here.
        None
    }

    /// Apply changes to the config after it's been loaded, e.g. overriding
    /// values in a config file using command-line options.
    fn process_config(
        &self,
        _config: BtrfsBackupConfig,
    ) -> Result<BtrfsBackupConfig, FrameworkError> {
        let mut config = self.config.clone();

        // collect logs during merging as we start the logger *after* merging
        let mut merge_logs = Vec::new();

        // get global options from command line / config file
        if config.global.use_profiles.is_empty() {
            config.merge_profile("btrfs-backup", &mut merge_logs, Level::Info)?;
        } else {
            for profile in &config.global.use_profiles.clone() {
                config.merge_profile(profile, &mut merge_logs, Level::Warn)?;
            }
        }

        // start logger
        let level_filter = match &config.global.log_level {
            Some(level) => LevelFilter::from_str(level)
                .map_err(|e| FrameworkErrorKind::ConfigError.context(e))?,
            None => LevelFilter::Info,
        };
        match &config.global.log_file {
            None => TermLogger::init(
                level_filter,
                simplelog::ConfigBuilder::new()
                    .set_time_level(LevelFilter::Off)
                    .build(),
                TerminalMode::Stderr,
                ColorChoice::Auto,
            )
            .map_err(|e| FrameworkErrorKind::ConfigError.context(e))?,

            Some(file) => CombinedLogger::init(vec![
                TermLogger::new(
                    level_filter.min(LevelFilter::Warn),
                    simplelog::ConfigBuilder::new()
                        .set_time_level(LevelFilter::Off)
                        .build(),
                    TerminalMode::Stderr,
                    ColorChoice::Auto,
                ),
                WriteLogger::new(
                    level_filter,
                    simplelog::Config::default(),
                    File::options().create(true).append(true).open(file)?,
                ),
            ])
            .map_err(|e| FrameworkErrorKind::ConfigError.context(e))?,
        }

        // display logs from merging
        for (level, merge_log) in merge_logs {
            log!(level, "{}", merge_log);
        }

        match &self.commands {
            BtrfsBackupCmd::Backup(cmd) => cmd.override_config(config),
            BtrfsBackupCmd::Restore(cmd) => cmd.override_config(config),

            // subcommands that don't need special overrides use a catch all
            _ => Ok(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::EntryPoint;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        EntryPoint::command().debug_assert();
    }
}
