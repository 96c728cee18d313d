//! Command implementations.
//!
//! Each submodule handles one CLI subcommand.

mod harden;
mod size;
mod stats;

use crate::cli::{Cli, Commands};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Harden {
            input,
            output,
            lfence,
        } => harden::cmd_harden(input, output.as_deref(), &lfence.to_config()),
        Commands::Stats { input, lfence } => stats::cmd_stats(input, &lfence.to_config()),
        Commands::Size { input, lfence } => size::cmd_size(input, &lfence.to_config()),
    }
}
