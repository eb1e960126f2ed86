//! btrfs-backup Config
//!
//! Configuration is merged from the command line and TOML profiles; see
//! [`BtrfsBackupConfig::merge_profile`].

use std::path::PathBuf;

use abscissa_core::config::Config;
use abscissa_core::path::AbsPathBuf;
use abscissa_core::FrameworkError;
use clap::{Parser, ValueHint};
use directories::ProjectDirs;
use itertools::Itertools;
use log::Level;
use merge::Merge;
use serde::{Deserialize, Serialize};

use crate::commands::{backup::BackupCmd, restore::RestoreCmd};

/// btrfs-backup Configuration
#[derive(Clone, Default, Debug, Parser, Deserialize, Serialize, Merge)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BtrfsBackupConfig {
    /// Global options
    #[clap(flatten, next_help_heading = "Global options")]
    pub global: GlobalOptions,

    /// Backup options
    #[clap(skip)]
    pub backup: BackupCmd,

    /// Restore options
    #[clap(skip)]
    pub restore: RestoreCmd,
}

impl BtrfsBackupConfig {
    /// Merge a profile into the current config by reading the corresponding config file.
    /// Also recursively merge all profiles given within this config file.
    ///
    /// # Arguments
    ///
    /// * `profile` - name of the profile to merge
    /// * `merge_logs` - Vector to collect logs during merging
    /// * `level_missing` - The log level to use if this profile is missing. Recursive calls will produce a Warning.
    pub fn merge_profile(
        &mut self,
        profile: &str,
        merge_logs: &mut Vec<(Level, String)>,
        level_missing: Level,
    ) -> Result<(), FrameworkError> {
        let profile_filename = profile.to_string() + ".toml";
        let paths = get_config_paths(&profile_filename);

        if let Some(path) = paths.iter().find(|path| path.exists()) {
            merge_logs.push((Level::Info, format!("using config {}", path.display())));
            let mut config = Self::load_toml_file(AbsPathBuf::canonicalize(path)?)?;
            // if "use-profile" is defined in the config file, merge the referenced profiles first
            for profile in &config.global.use_profiles.clone() {
                config.merge_profile(profile, merge_logs, Level::Warn)?;
            }
            self.merge(config);
        } else {
            let paths_string = paths.iter().map(|path| path.display()).join(", ");
            merge_logs.push((
                level_missing,
                format!(
                    "using no config file, none of these exist: {}",
                    &paths_string
                ),
            ));
        };
        Ok(())
    }
}

/// Global options
///
/// These options are available for all commands.
#[derive(Default, Debug, Parser, Clone, Deserialize, Serialize, Merge)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct GlobalOptions {
    /// Config profile to use. This parses the file `<PROFILE>.toml` in the config directory.
    /// [default: "btrfs-backup"]
    #[clap(short = 'P', long = "use-profile", global = true, value_name = "PROFILE")]
    #[merge(strategy = merge::vec::append)]
    pub use_profiles: Vec<String>,

    /// Only show what would be done without modifying anything. Does not affect read-only commands.
    #[clap(long, short = 'n', global = true)]
    #[merge(strategy = merge::bool::overwrite_false)]
    pub dry_run: bool,

    /// Use this log level [default: info]
    #[clap(long, global = true)]
    pub log_level: Option<String>,

    /// Write log messages to the given file instead of printing them.
    ///
    /// # Note
    ///
    /// Warnings and errors are still additionally printed unless they are ignored by `--log-level`
    #[clap(long, global = true, value_name = "LOGFILE", value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,
}

/// Options shared by the `backup` and `restore` transfers.
#[derive(Clone, Default, Debug, Parser, Deserialize, Serialize, Merge)]
#[serde(default, rename_all = "kebab-case")]
pub struct TransferOptions {
    /// Path to a subvolume to process (can be specified multiple times)
    #[clap(short = 's', long = "subvolume", value_name = "PATH")]
    #[merge(strategy = merge::vec::overwrite_empty)]
    pub subvolumes: Vec<PathBuf>,

    /// The command to use for running commands on a remote site. Needs to
    /// include the full path to the binary or script, e.g. "/usr/bin/ssh server"
    #[clap(long, value_name = "COMMAND")]
    pub remote_cmd: Option<String>,

    /// A filter command applied in the snapshot send process (can be
    /// specified multiple times; full path required)
    #[clap(long = "send-filter", value_name = "COMMAND")]
    #[merge(strategy = merge::vec::overwrite_empty)]
    pub send_filters: Vec<String>,

    /// A filter command applied in the snapshot receive process (can be
    /// specified multiple times; full path required)
    #[clap(long = "recv-filter", value_name = "COMMAND")]
    #[merge(strategy = merge::vec::overwrite_empty)]
    pub recv_filters: Vec<String>,

    /// Extension of snapshot files; declares the snapshot-receiving
    /// repository a file repository. The designated filter must contain the
    /// "{file}" placeholder.
    #[clap(long, value_name = "EXTENSION")]
    pub snapshot_ext: Option<String>,

    /// Reverse (i.e., swap) the source and destination repositories as well
    /// as the send and receive filters.
    #[clap(long)]
    #[merge(strategy = merge::bool::overwrite_false)]
    pub reverse: bool,

    /// Turn off reading of data from stderr of spawned commands; only exit
    /// codes discriminate success from failure then. This helps when a
    /// remote command forks a child which keeps stderr open longer than the
    /// command itself.
    #[clap(long)]
    #[merge(strategy = merge::bool::overwrite_false)]
    pub no_read_stderr: bool,
}

/// Get the paths to the config file
///
/// # Arguments
///
/// * `filename` - name of the config file
///
/// # Returns
///
/// A vector of [`PathBuf`]s to the config files
fn get_config_paths(filename: &str) -> Vec<PathBuf> {
    [
        ProjectDirs::from("", "", "btrfs-backup")
            .map(|project_dirs| project_dirs.config_dir().to_path_buf()),
        get_global_config_path(),
        Some(PathBuf::from(".")),
    ]
    .into_iter()
    .filter_map(|path| {
        path.map(|mut p| {
            p.push(filename);
            p
        })
    })
    .collect()
}

/// Get the path to the global config directory on Windows.
///
/// # Returns
///
/// The path to the global config directory on Windows.
/// If the environment variable `PROGRAMDATA` is not set, `None` is returned.
#[cfg(target_os = "windows")]
fn get_global_config_path() -> Option<PathBuf> {
    std::env::var_os("PROGRAMDATA").map(|program_data| {
        let mut path = PathBuf::from(program_data);
        path.push(r"btrfs-backup\config");
        path
    })
}

/// Get the path to the global config directory on non-Windows targets.
///
/// # Returns
///
/// "/etc/btrfs-backup" is returned.
#[cfg(not(target_os = "windows"))]
fn get_global_config_path() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/btrfs-backup"))
}
