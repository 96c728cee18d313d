//! x86-64 instruction model for binary hardening.
//!
//! Provides registers and operands, the `Inst` enum, speculation-relevant
//! classification, instruction synthesis (`InstBuilder`), a machine-code
//! encoder used as a code-size oracle, and an AT&T text parser.

mod builder;
mod classify;
mod encoder;
mod inst;
mod operand;
mod parse;
mod reg;

pub use builder::*;
pub use classify::*;
pub use encoder::*;
pub use inst::*;
pub use operand::*;
pub use reg::*;

use thiserror::Error;

/// Invalid operand construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperandError {
    #[error("Invalid scale factor: {0} (expected 1, 2, 4 or 8)")]
    InvalidScale(u8),
    #[error("Register {0} cannot be used as an index")]
    InvalidIndex(Gpr),
    #[error("%rip-relative address cannot have an index")]
    RipWithIndex,
    #[error("Displacement out of 32-bit range: {0:#x}")]
    DisplacementOutOfRange(i64),
}

/// AT&T instruction text errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty instruction")]
    Empty,
    #[error("Unknown mnemonic: {0}")]
    UnknownMnemonic(String),
    #[error("Unknown register: {0}")]
    UnknownRegister(String),
    #[error("Invalid operand: {0}")]
    InvalidOperand(String),
    #[error("{mnemonic} expects {expected} operand(s), got {actual}")]
    OperandCount {
        mnemonic: String,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid immediate: {0}")]
    InvalidImmediate(String),
    #[error("Operand size is ambiguous for {0}; add a b/w/l/q suffix")]
    AmbiguousWidth(String),
    #[error("Operand size mismatch in {0}")]
    WidthMismatch(String),
    #[error(transparent)]
    Operand(#[from] OperandError),
}

pub type Result<T> = std::result::Result<T, ParseError>;
