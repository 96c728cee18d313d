//! x86-64 general-purpose and segment registers.
//!
//! Registers are stored by hardware number; the operand width decides which
//! name is printed (`%rax`, `%eax`, `%ax`, `%al`).

use std::fmt;

/// Operand width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Width {
    B,
    W,
    D,
    Q,
}

impl Width {
    /// AT&T mnemonic suffix.
    #[must_use]
    pub const fn suffix(self) -> char {
        match self {
            Self::B => 'b',
            Self::W => 'w',
            Self::D => 'l',
            Self::Q => 'q',
        }
    }

    /// Parse an AT&T mnemonic suffix.
    #[must_use]
    pub const fn from_suffix(c: char) -> Option<Self> {
        match c {
            'b' => Some(Self::B),
            'w' => Some(Self::W),
            'l' => Some(Self::D),
            'q' => Some(Self::Q),
            _ => None,
        }
    }

    /// Size in bytes.
    #[must_use]
    pub const fn bytes(self) -> u8 {
        match self {
            Self::B => 1,
            Self::W => 2,
            Self::D => 4,
            Self::Q => 8,
        }
    }
}

/// General-purpose register, numbered as in the ModR/M encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

/// All registers in encoding order.
pub const ALL_GPRS: [Gpr; 16] = [
    Gpr::Rax,
    Gpr::Rcx,
    Gpr::Rdx,
    Gpr::Rbx,
    Gpr::Rsp,
    Gpr::Rbp,
    Gpr::Rsi,
    Gpr::Rdi,
    Gpr::R8,
    Gpr::R9,
    Gpr::R10,
    Gpr::R11,
    Gpr::R12,
    Gpr::R13,
    Gpr::R14,
    Gpr::R15,
];

const NAMES_64: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

const NAMES_32: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d",
    "r12d", "r13d", "r14d", "r15d",
];

const NAMES_16: [&str; 16] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w",
    "r13w", "r14w", "r15w",
];

/// Low byte registers. The legacy high-byte registers (ah, bh, ch, dh) are
/// not modelled.
const NAMES_8: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];

impl Gpr {
    /// Hardware register number (0-15).
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Low three bits, as placed in ModR/M, SIB or opcode.
    #[must_use]
    pub const fn low3(self) -> u8 {
        self.code() & 0x7
    }

    /// Check if the register needs a REX extension bit (r8-r15).
    #[must_use]
    pub const fn is_extended(self) -> bool {
        self.code() >= 8
    }

    /// Check if the byte form needs an empty REX prefix (spl, bpl, sil, dil).
    #[must_use]
    pub const fn byte_needs_rex(self) -> bool {
        matches!(self, Self::Rsp | Self::Rbp | Self::Rsi | Self::Rdi)
    }

    /// Register name for the given width, without the `%` sigil.
    #[must_use]
    pub const fn name(self, width: Width) -> &'static str {
        let idx = self.code() as usize;
        match width {
            Width::Q => NAMES_64[idx],
            Width::D => NAMES_32[idx],
            Width::W => NAMES_16[idx],
            Width::B => NAMES_8[idx],
        }
    }

    /// Parse a register name of any width (without `%`).
    #[must_use]
    pub fn parse(name: &str) -> Option<(Self, Width)> {
        [
            (&NAMES_64, Width::Q),
            (&NAMES_32, Width::D),
            (&NAMES_16, Width::W),
            (&NAMES_8, Width::B),
        ]
        .into_iter()
        .find_map(|(names, width)| {
            names
                .iter()
                .position(|&n| n == name)
                .map(|idx| (ALL_GPRS[idx], width))
        })
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name(Width::Q))
    }
}

/// Segment override register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SegmentReg {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

impl SegmentReg {
    /// Segment override prefix byte.
    #[must_use]
    pub const fn prefix(self) -> u8 {
        match self {
            Self::Es => 0x26,
            Self::Cs => 0x2E,
            Self::Ss => 0x36,
            Self::Ds => 0x3E,
            Self::Fs => 0x64,
            Self::Gs => 0x65,
        }
    }

    /// Register name without `%`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Es => "es",
            Self::Cs => "cs",
            Self::Ss => "ss",
            Self::Ds => "ds",
            Self::Fs => "fs",
            Self::Gs => "gs",
        }
    }

    /// Parse a segment register name (without `%`).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "es" => Some(Self::Es),
            "cs" => Some(Self::Cs),
            "ss" => Some(Self::Ss),
            "ds" => Some(Self::Ds),
            "fs" => Some(Self::Fs),
            "gs" => Some(Self::Gs),
            _ => None,
        }
    }
}

impl fmt::Display for SegmentReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name())
    }
}

/// System V integer argument registers, in order.
pub const INT_ARG_REGS: [Gpr; 6] = [Gpr::Rdi, Gpr::Rsi, Gpr::Rdx, Gpr::Rcx, Gpr::R8, Gpr::R9];
