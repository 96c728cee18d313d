//! Stats command: a dry run of the pass.

use std::path::Path;

use bfence::{Hardener, LfenceConfig};
use tracing::{error, info};

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal;

/// Handle the `stats` command.
///
/// Only the rule switches and function selection apply; the master switch
/// is ignored so the report can be produced before enabling the pass.
pub fn cmd_stats(input: &Path, config: &LfenceConfig) -> i32 {
    let program = match bfence::read_listing(input) {
        Ok(program) => program,
        Err(err) => {
            error!(error = %err, "failed to read listing");
            terminal::error(&err.to_string());
            return EXIT_FAILURE;
        }
    };

    let stats = Hardener::new(config.clone()).survey(&program);
    info!(
        functions = program.len(),
        instructions = program.instruction_count(),
        sites = stats.total(),
        "surveyed listing"
    );
    print!("{stats}");
    EXIT_SUCCESS
}
