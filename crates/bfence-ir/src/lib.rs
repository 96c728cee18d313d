//! Program representation for binary hardening passes.
//!
//! This crate provides pure container types with no ISA-specific knowledge.
//! Instructions are an opaque type parameter; the x86-64 instruction model
//! lives in `bfence-x86`.

mod block;
mod function;
mod program;
mod target;

pub use block::*;
pub use function::*;
pub use program::*;
pub use target::*;

use thiserror::Error;

/// Program model errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("Duplicate function: {0}")]
    DuplicateFunction(String),
    #[error("Unknown target architecture: {0}")]
    UnknownTarget(String),
    #[error("Unknown relocation mode: {0} (expected on or off)")]
    UnknownRelocationMode(String),
}

pub type Result<T> = std::result::Result<T, IrError>;
