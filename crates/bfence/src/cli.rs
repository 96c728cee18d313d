//! CLI definitions and argument types.

use std::path::PathBuf;

use bfence::{FunctionFilter, LfenceConfig, Parallelism};
use clap::{Parser, Subcommand};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "bfence")]
#[command(about = "Spectre v1 hardening for x86-64 listings")]
#[command(version)]
pub struct Cli {
    /// Show metrics summary after execution
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Harden a listing and write the result
    Harden {
        /// Input listing
        #[arg(value_name = "LISTING")]
        input: PathBuf,

        /// Output listing (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        lfence: LfenceArgs,
    },
    /// Count the sites each rule would touch, without rewriting
    Stats {
        /// Input listing
        #[arg(value_name = "LISTING")]
        input: PathBuf,

        #[command(flatten)]
        lfence: LfenceArgs,
    },
    /// Show per-function encoded size before and after hardening
    Size {
        /// Input listing
        #[arg(value_name = "LISTING")]
        input: PathBuf,

        #[command(flatten)]
        lfence: LfenceArgs,
    },
}

/// Lfence insertion options shared by all commands.
#[derive(clap::Args, Clone, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct LfenceArgs {
    /// Enable lfence insertion (the master switch)
    #[arg(long)]
    pub insert_lfences: bool,

    /// Insert an lfence before conditional branches
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    pub lfence_conditional_branches: bool,

    /// Insert an lfence after loads
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    pub lfence_loads: bool,

    /// Harden returns
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    pub lfence_returns: bool,

    /// Rewrite memory-indirect calls
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    pub lfence_indirect_calls: bool,

    /// Rewrite memory-indirect jumps
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    pub lfence_indirect_jumps: bool,

    /// Functions to leave untouched (comma-separated)
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    pub skip_funcs: Vec<String>,

    /// Only harden these functions (comma-separated)
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    pub funcs: Vec<String>,

    /// Number of parallel jobs (0 = auto, 1 = serial)
    #[arg(short = 'j', long, default_value = "0")]
    pub jobs: usize,

    /// Process functions on the calling thread only
    #[arg(long, conflicts_with = "jobs")]
    pub no_threads: bool,
}

impl LfenceArgs {
    /// Build the pass configuration.
    pub fn to_config(&self) -> LfenceConfig {
        let mut filter = FunctionFilter::new().with_skip(self.skip_funcs.iter().cloned());
        if !self.funcs.is_empty() {
            filter = filter.with_only(self.funcs.iter().cloned());
        }
        let parallelism = if self.no_threads {
            Parallelism::Serial
        } else {
            Parallelism::from_jobs(self.jobs)
        };

        LfenceConfig::default()
            .with_enabled(self.insert_lfences)
            .with_conditional_branches(self.lfence_conditional_branches)
            .with_loads(self.lfence_loads)
            .with_returns(self.lfence_returns)
            .with_indirect_calls(self.lfence_indirect_calls)
            .with_indirect_jumps(self.lfence_indirect_jumps)
            .with_parallelism(parallelism)
            .with_filter(filter)
    }
}
