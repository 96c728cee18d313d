//! Target description queried by passes before they touch code.

use std::fmt;
use std::str::FromStr;

use crate::IrError;

/// Machine architecture of the program being rewritten.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TargetArch {
    #[default]
    X86_64,
    AArch64,
    RiscV64,
}

impl TargetArch {
    /// Check if this is an x86 target.
    #[must_use]
    pub const fn is_x86(self) -> bool {
        matches!(self, Self::X86_64)
    }

    /// Canonical name, as accepted by `FromStr`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::AArch64 => "aarch64",
            Self::RiscV64 => "riscv64",
        }
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetArch {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" | "x86-64" | "amd64" => Ok(Self::X86_64),
            "aarch64" | "arm64" => Ok(Self::AArch64),
            "riscv64" => Ok(Self::RiscV64),
            _ => Err(IrError::UnknownTarget(s.to_string())),
        }
    }
}

/// Whether address references stay adjustable after rewriting.
///
/// Passes that compute byte offsets between rewritten instructions need
/// relocations, since the final layout is only fixed up afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RelocationMode {
    /// Relocations are preserved; code may be freely re-laid out.
    #[default]
    Relocations,
    /// Code is patched in place at its original addresses.
    NoRelocations,
}

impl RelocationMode {
    /// Check if relocations are preserved.
    #[must_use]
    pub const fn has_relocations(self) -> bool {
        matches!(self, Self::Relocations)
    }
}

impl fmt::Display for RelocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.has_relocations() { "on" } else { "off" })
    }
}

impl FromStr for RelocationMode {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" | "yes" | "true" => Ok(Self::Relocations),
            "off" | "no" | "false" => Ok(Self::NoRelocations),
            _ => Err(IrError::UnknownRelocationMode(s.to_string())),
        }
    }
}
