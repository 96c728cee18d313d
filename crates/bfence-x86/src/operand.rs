//! Instruction operands.
//!
//! Memory operands are validated on construction so that every value of
//! `MemOperand` has an x86-64 encoding.

use std::fmt;

use crate::OperandError;
use crate::reg::{Gpr, SegmentReg, Width};

/// SIB scale factor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Scale {
    #[default]
    X1,
    X2,
    X4,
    X8,
}

impl Scale {
    /// Scale factor value.
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X4 => 4,
            Self::X8 => 8,
        }
    }

    /// SIB `ss` field.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::X1 => 0,
            Self::X2 => 1,
            Self::X4 => 2,
            Self::X8 => 3,
        }
    }

    /// Build from a factor.
    ///
    /// # Errors
    ///
    /// Returns `OperandError::InvalidScale` unless `value` is 1, 2, 4 or 8.
    pub const fn from_value(value: u8) -> Result<Self, OperandError> {
        match value {
            1 => Ok(Self::X1),
            2 => Ok(Self::X2),
            4 => Ok(Self::X4),
            8 => Ok(Self::X8),
            _ => Err(OperandError::InvalidScale(value)),
        }
    }
}

/// Address displacement: a constant or a symbol plus addend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Displacement {
    Imm(i32),
    Symbol { name: String, addend: i32 },
}

impl Default for Displacement {
    fn default() -> Self {
        Self::Imm(0)
    }
}

impl Displacement {
    /// Create a symbolic displacement.
    #[must_use]
    pub fn symbol(name: impl Into<String>, addend: i32) -> Self {
        Self::Symbol {
            name: name.into(),
            addend,
        }
    }

    /// Check if this is a literal zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        matches!(self, Self::Imm(0))
    }

    /// Constant value, if not symbolic.
    #[must_use]
    pub const fn as_imm(&self) -> Option<i32> {
        match self {
            Self::Imm(v) => Some(*v),
            Self::Symbol { .. } => None,
        }
    }

    /// Same displacement moved by `delta` bytes. `None` on overflow.
    #[must_use]
    pub fn offset_by(&self, delta: i32) -> Option<Self> {
        match self {
            Self::Imm(v) => v.checked_add(delta).map(Self::Imm),
            Self::Symbol { name, addend } => Some(Self::Symbol {
                name: name.clone(),
                addend: addend.checked_add(delta)?,
            }),
        }
    }
}

impl fmt::Display for Displacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imm(v) => f.write_str(&hex(i64::from(*v))),
            Self::Symbol { name, addend: 0 } => f.write_str(name),
            Self::Symbol { name, addend } if *addend < 0 => {
                write!(f, "{name}-{:#x}", i64::from(*addend).unsigned_abs())
            }
            Self::Symbol { name, addend } => write!(f, "{name}+{addend:#x}"),
        }
    }
}

/// Format a signed value as AT&T-style hex (`0x8`, `-0x8`).
pub(crate) fn hex(v: i64) -> String {
    if v < 0 {
        format!("-{:#x}", v.unsigned_abs())
    } else {
        format!("{v:#x}")
    }
}

/// Base of an effective address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Base {
    Gpr(Gpr),
    /// `%rip`-relative; displacement counts from the end of the instruction.
    Rip,
}

impl From<Gpr> for Base {
    fn from(reg: Gpr) -> Self {
        Self::Gpr(reg)
    }
}

impl fmt::Display for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpr(reg) => write!(f, "{reg}"),
            Self::Rip => f.write_str("%rip"),
        }
    }
}

/// Memory operand: `segment:disp(base, index, scale)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemOperand {
    base: Option<Base>,
    index: Option<Gpr>,
    scale: Scale,
    disp: Displacement,
    segment: Option<SegmentReg>,
}

impl MemOperand {
    /// Create a validated memory operand.
    ///
    /// # Errors
    ///
    /// Returns `OperandError::InvalidIndex` for `%rsp` as index and
    /// `OperandError::RipWithIndex` for a `%rip` base combined with an index.
    pub fn new(
        base: Option<Base>,
        index: Option<Gpr>,
        scale: Scale,
        disp: Displacement,
        segment: Option<SegmentReg>,
    ) -> Result<Self, OperandError> {
        if index == Some(Gpr::Rsp) {
            return Err(OperandError::InvalidIndex(Gpr::Rsp));
        }
        if base == Some(Base::Rip) && index.is_some() {
            return Err(OperandError::RipWithIndex);
        }
        Ok(Self {
            base,
            index,
            scale,
            disp,
            segment,
        })
    }

    /// `(base)`.
    #[must_use]
    pub const fn base(base: Gpr) -> Self {
        Self::base_disp(base, 0)
    }

    /// `disp(base)`.
    #[must_use]
    pub const fn base_disp(base: Gpr, disp: i32) -> Self {
        Self {
            base: Some(Base::Gpr(base)),
            index: None,
            scale: Scale::X1,
            disp: Displacement::Imm(disp),
            segment: None,
        }
    }

    /// `disp(%rip)`.
    #[must_use]
    pub const fn rip(disp: Displacement) -> Self {
        Self {
            base: Some(Base::Rip),
            index: None,
            scale: Scale::X1,
            disp,
            segment: None,
        }
    }

    /// Same operand with another displacement.
    #[must_use]
    pub fn with_disp(mut self, disp: Displacement) -> Self {
        self.disp = disp;
        self
    }

    /// Same operand with a segment override.
    #[must_use]
    pub fn with_segment(mut self, segment: SegmentReg) -> Self {
        self.segment = Some(segment);
        self
    }

    #[must_use]
    pub const fn base_reg(&self) -> Option<Base> {
        self.base
    }

    #[must_use]
    pub const fn index(&self) -> Option<Gpr> {
        self.index
    }

    #[must_use]
    pub const fn scale(&self) -> Scale {
        self.scale
    }

    #[must_use]
    pub const fn disp(&self) -> &Displacement {
        &self.disp
    }

    #[must_use]
    pub const fn segment(&self) -> Option<SegmentReg> {
        self.segment
    }

    /// Check if the address is `%rip`-relative.
    #[must_use]
    pub fn is_rip_relative(&self) -> bool {
        self.base == Some(Base::Rip)
    }
}

impl fmt::Display for MemOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(seg) = self.segment {
            write!(f, "{seg}:")?;
        }
        let has_regs = self.base.is_some() || self.index.is_some();
        if !has_regs || !self.disp.is_zero() {
            write!(f, "{}", self.disp)?;
        }
        if !has_regs {
            return Ok(());
        }
        f.write_str("(")?;
        if let Some(base) = self.base {
            write!(f, "{base}")?;
        }
        if let Some(index) = self.index {
            write!(f, ",{index},{}", self.scale.value())?;
        }
        f.write_str(")")
    }
}

/// Register or memory destination (`r/m` operand).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegOrMem {
    Reg(Gpr),
    Mem(MemOperand),
}

/// Two-operand data form. Memory-to-memory forms do not exist on x86.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataForm {
    RegReg { src: Gpr, dst: Gpr },
    /// Memory source: the instruction reads memory.
    MemReg { src: MemOperand, dst: Gpr },
    RegMem { src: Gpr, dst: MemOperand },
    ImmReg { imm: i32, dst: Gpr },
    ImmMem { imm: i32, dst: MemOperand },
}

impl DataForm {
    /// Memory operand, if any.
    #[must_use]
    pub const fn mem(&self) -> Option<&MemOperand> {
        match self {
            Self::MemReg { src: mem, .. }
            | Self::RegMem { dst: mem, .. }
            | Self::ImmMem { dst: mem, .. } => Some(mem),
            Self::RegReg { .. } | Self::ImmReg { .. } => None,
        }
    }

    /// Format as AT&T `src, dst` for the given width.
    pub(crate) fn fmt_operands(&self, width: Width, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegReg { src, dst } => write!(f, "%{}, %{}", src.name(width), dst.name(width)),
            Self::MemReg { src, dst } => write!(f, "{src}, %{}", dst.name(width)),
            Self::RegMem { src, dst } => write!(f, "%{}, {dst}", src.name(width)),
            Self::ImmReg { imm, dst } => {
                write!(f, "${}, %{}", hex(i64::from(*imm)), dst.name(width))
            }
            Self::ImmMem { imm, dst } => write!(f, "${}, {dst}", hex(i64::from(*imm))),
        }
    }
}

/// Target of a jump or call.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum JumpTarget {
    /// Direct transfer to a label or symbol.
    Direct(String),
    /// `*%reg`.
    Reg(Gpr),
    /// `*mem`: target address loaded from memory.
    Mem(MemOperand),
}

impl JumpTarget {
    /// Check if the target is computed at runtime.
    #[must_use]
    pub const fn is_indirect(&self) -> bool {
        !matches!(self, Self::Direct(_))
    }
}

impl fmt::Display for JumpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(label) => f.write_str(label),
            Self::Reg(reg) => write!(f, "*{reg}"),
            Self::Mem(mem) => write!(f, "*{mem}"),
        }
    }
}
