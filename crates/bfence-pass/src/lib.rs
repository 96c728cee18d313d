//! Speculative-execution hardening for x86-64 programs.
//!
//! [`LfenceInsertion`] walks every eligible function and rewrites
//! speculation-sensitive instructions:
//!
//! - conditional branches get an `lfence` in front of them,
//! - loads get an `lfence` behind them,
//! - returns touch their return slot and fence before returning,
//! - memory-indirect calls and jumps are turned into a fenced `push; ret`.
//!
//! # Example
//!
//! ```ignore
//! use bfence_pass::{LfenceConfig, LfenceInsertion};
//!
//! let pass = LfenceInsertion::new(LfenceConfig::default().with_enabled(true));
//! let stats = pass.run(&mut program)?;
//! println!("{stats}");
//! ```

mod config;
mod pass;
mod rewrite;
mod stats;

pub use config::*;
pub use pass::*;
pub use rewrite::{RETURN_ADDRESS_FIXED_BYTES, Rule, select_rule};
pub use stats::*;

use bfence_ir::TargetArch;
use thiserror::Error;

/// Fatal pass preconditions.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("lfence insertion only supports x86_64, target is {0}")]
    UnsupportedTarget(TargetArch),
    #[error("lfence insertion requires relocation mode")]
    RelocationsRequired,
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, PassError>;
