//! Harden command.

use std::path::Path;

use bfence::{Hardener, LfenceConfig};
use tracing::error;

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal;

/// Handle the `harden` command.
pub fn cmd_harden(input: &Path, output: Option<&Path>, config: &LfenceConfig) -> i32 {
    if !config.enabled {
        terminal::warning("lfence insertion is disabled; pass --insert-lfences to enable it");
    }

    let hardener = Hardener::new(config.clone());
    match hardener.harden_file(input, output) {
        Ok((stats, listing)) => {
            if let Some(listing) = listing {
                print!("{listing}");
            }
            eprint!("{stats}");
            if let Some(path) = output {
                terminal::success("hardened listing written");
                terminal::path_output(path);
            }
            EXIT_SUCCESS
        }
        Err(err) => {
            error!(error = %err, "hardening failed");
            terminal::error(&err.to_string());
            EXIT_FAILURE
        }
    }
}
