//! `completions` subcommand

use std::io::Write;

use abscissa_core::{Command, Runnable};
use clap::{CommandFactory, ValueEnum};
use clap_complete::{generate, shells, Generator};

use crate::commands::EntryPoint;

/// `completions` subcommand
#[derive(clap::Parser, Command, Debug)]
pub(crate) struct CompletionsCmd {
    /// Shell to generate completions for
    #[clap(value_enum)]
    shell: Variant,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Variant {
    Bash,
    Fish,
    Zsh,
}

impl Runnable for CompletionsCmd {
    fn run(&self) {
        match self.shell {
            Variant::Bash => generate_completion(shells::Bash, &mut std::io::stdout()),
            Variant::Fish => generate_completion(shells::Fish, &mut std::io::stdout()),
            Variant::Zsh => generate_completion(shells::Zsh, &mut std::io::stdout()),
        }
    }
}

fn generate_completion<G: Generator>(shell: G, buf: &mut dyn Write) {
    let mut command = EntryPoint::command();
    generate(shell, &mut command, "btrfs-backup", buf);
}
