//! x86-64 instruction model.
//!
//! Covers the instruction shapes a hardening pass needs to recognise or
//! synthesise. Anything outside this subset is left to the host's
//! disassembler and never reaches the pass.

use std::fmt;

use crate::operand::{DataForm, JumpTarget, MemOperand, RegOrMem, hex};
use crate::reg::{Gpr, Width};

/// Two-operand arithmetic and compare operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Or,
    And,
    Sub,
    Xor,
    Cmp,
    Test,
}

impl AluOp {
    /// Mnemonic without width suffix.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Or => "or",
            Self::And => "and",
            Self::Sub => "sub",
            Self::Xor => "xor",
            Self::Cmp => "cmp",
            Self::Test => "test",
        }
    }

    /// Parse a mnemonic without width suffix.
    #[must_use]
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        [
            Self::Add,
            Self::Or,
            Self::And,
            Self::Sub,
            Self::Xor,
            Self::Cmp,
            Self::Test,
        ]
        .into_iter()
        .find(|op| op.mnemonic() == s)
    }

    /// ModR/M `/digit` extension of the group-1 opcodes (`0x80`/`0x81`/`0x83`).
    /// `Test` has its own opcodes and no group-1 slot.
    #[must_use]
    pub const fn group1_ext(self) -> Option<u8> {
        match self {
            Self::Add => Some(0),
            Self::Or => Some(1),
            Self::And => Some(4),
            Self::Sub => Some(5),
            Self::Xor => Some(6),
            Self::Cmp => Some(7),
            Self::Test => None,
        }
    }

    /// Check if the operation only sets flags.
    #[must_use]
    pub const fn is_compare(self) -> bool {
        matches!(self, Self::Cmp | Self::Test)
    }
}

/// Condition code, numbered as in the `jcc` opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CondCode {
    O = 0x0,
    No = 0x1,
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    P = 0xA,
    Np = 0xB,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

impl CondCode {
    /// Low nibble of the `jcc` opcode.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Canonical suffix (`e`, `ne`, ...).
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::O => "o",
            Self::No => "no",
            Self::B => "b",
            Self::Ae => "ae",
            Self::E => "e",
            Self::Ne => "ne",
            Self::Be => "be",
            Self::A => "a",
            Self::S => "s",
            Self::Ns => "ns",
            Self::P => "p",
            Self::Np => "np",
            Self::L => "l",
            Self::Ge => "ge",
            Self::Le => "le",
            Self::G => "g",
        }
    }

    /// Parse a condition suffix, including the usual aliases (`z`, `nz`, `c`, ...).
    #[must_use]
    pub fn from_suffix(s: &str) -> Option<Self> {
        let cc = match s {
            "o" => Self::O,
            "no" => Self::No,
            "b" | "c" | "nae" => Self::B,
            "ae" | "nb" | "nc" => Self::Ae,
            "e" | "z" => Self::E,
            "ne" | "nz" => Self::Ne,
            "be" | "na" => Self::Be,
            "a" | "nbe" => Self::A,
            "s" => Self::S,
            "ns" => Self::Ns,
            "p" | "pe" => Self::P,
            "np" | "po" => Self::Np,
            "l" | "nge" => Self::L,
            "ge" | "nl" => Self::Ge,
            "le" | "ng" => Self::Le,
            "g" | "nle" => Self::G,
            _ => return None,
        };
        Some(cc)
    }
}

/// Coarse instruction category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstKind {
    Barrier,
    Nop,
    Return,
    Stack,
    Arith,
    Move,
    AddressCalc,
    CondBranch,
    Jump,
    Call,
}

/// A single x86-64 instruction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Inst {
    /// `lfence`: load-ordering speculation barrier.
    Lfence,
    Nop,
    /// Near return.
    Ret,
    Push(Gpr),
    /// `push mem`: 64-bit push of a value read from memory.
    PushMem(MemOperand),
    Pop(Gpr),
    /// Bitwise complement in place.
    Not { width: Width, dst: RegOrMem },
    Lea { src: MemOperand, dst: Gpr },
    Mov { width: Width, form: DataForm },
    /// `movabsq $imm64, %reg`.
    MovAbs { imm: i64, dst: Gpr },
    Alu { op: AluOp, width: Width, form: DataForm },
    Jcc { cond: CondCode, target: String },
    Jmp(JumpTarget),
    Call(JumpTarget),
}

impl Inst {
    /// `mov mem, reg`.
    #[must_use]
    pub const fn load(width: Width, src: MemOperand, dst: Gpr) -> Self {
        Self::Mov {
            width,
            form: DataForm::MemReg { src, dst },
        }
    }

    /// `mov reg, mem`.
    #[must_use]
    pub const fn store(width: Width, src: Gpr, dst: MemOperand) -> Self {
        Self::Mov {
            width,
            form: DataForm::RegMem { src, dst },
        }
    }

    /// `mov reg, reg`.
    #[must_use]
    pub const fn mov_rr(width: Width, src: Gpr, dst: Gpr) -> Self {
        Self::Mov {
            width,
            form: DataForm::RegReg { src, dst },
        }
    }

    /// Two-operand ALU instruction.
    #[must_use]
    pub const fn alu(op: AluOp, width: Width, form: DataForm) -> Self {
        Self::Alu { op, width, form }
    }

    /// `cmp src, dst` on registers.
    #[must_use]
    pub const fn cmp_rr(width: Width, src: Gpr, dst: Gpr) -> Self {
        Self::alu(AluOp::Cmp, width, DataForm::RegReg { src, dst })
    }

    /// Conditional jump to a label.
    #[must_use]
    pub fn jcc(cond: CondCode, target: impl Into<String>) -> Self {
        Self::Jcc {
            cond,
            target: target.into(),
        }
    }

    /// Direct jump to a label.
    #[must_use]
    pub fn jmp(target: impl Into<String>) -> Self {
        Self::Jmp(JumpTarget::Direct(target.into()))
    }

    /// Direct call to a symbol.
    #[must_use]
    pub fn call(target: impl Into<String>) -> Self {
        Self::Call(JumpTarget::Direct(target.into()))
    }

    /// `call *mem`.
    #[must_use]
    pub const fn call_mem(mem: MemOperand) -> Self {
        Self::Call(JumpTarget::Mem(mem))
    }

    /// `jmp *mem`.
    #[must_use]
    pub const fn jmp_mem(mem: MemOperand) -> Self {
        Self::Jmp(JumpTarget::Mem(mem))
    }

    /// Coarse category.
    #[must_use]
    pub const fn kind(&self) -> InstKind {
        match self {
            Self::Lfence => InstKind::Barrier,
            Self::Nop => InstKind::Nop,
            Self::Ret => InstKind::Return,
            Self::Push(_) | Self::PushMem(_) | Self::Pop(_) => InstKind::Stack,
            Self::Not { .. } | Self::Alu { .. } => InstKind::Arith,
            Self::Mov { .. } | Self::MovAbs { .. } => InstKind::Move,
            Self::Lea { .. } => InstKind::AddressCalc,
            Self::Jcc { .. } => InstKind::CondBranch,
            Self::Jmp(_) => InstKind::Jump,
            Self::Call(_) => InstKind::Call,
        }
    }

    /// Explicit memory operand, if the instruction has one.
    #[must_use]
    pub const fn memory_operand(&self) -> Option<&MemOperand> {
        match self {
            Self::PushMem(mem)
            | Self::Lea { src: mem, .. }
            | Self::Not {
                dst: RegOrMem::Mem(mem),
                ..
            }
            | Self::Jmp(JumpTarget::Mem(mem))
            | Self::Call(JumpTarget::Mem(mem)) => Some(mem),
            Self::Mov { form, .. } | Self::Alu { form, .. } => form.mem(),
            _ => None,
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lfence => f.write_str("lfence"),
            Self::Nop => f.write_str("nop"),
            Self::Ret => f.write_str("retq"),
            Self::Push(reg) => write!(f, "pushq {reg}"),
            Self::PushMem(mem) => write!(f, "pushq {mem}"),
            Self::Pop(reg) => write!(f, "popq {reg}"),
            Self::Not { width, dst } => {
                write!(f, "not{} ", width.suffix())?;
                match dst {
                    RegOrMem::Reg(reg) => write!(f, "%{}", reg.name(*width)),
                    RegOrMem::Mem(mem) => write!(f, "{mem}"),
                }
            }
            Self::Lea { src, dst } => write!(f, "leaq {src}, {dst}"),
            Self::Mov { width, form } => {
                write!(f, "mov{} ", width.suffix())?;
                form.fmt_operands(*width, f)
            }
            Self::MovAbs { imm, dst } => write!(f, "movabsq ${}, {dst}", hex(*imm)),
            Self::Alu { op, width, form } => {
                write!(f, "{}{} ", op.mnemonic(), width.suffix())?;
                form.fmt_operands(*width, f)
            }
            Self::Jcc { cond, target } => write!(f, "j{} {target}", cond.suffix()),
            Self::Jmp(JumpTarget::Direct(label)) => write!(f, "jmp {label}"),
            Self::Jmp(target) => write!(f, "jmpq {target}"),
            Self::Call(JumpTarget::Direct(label)) => write!(f, "callq {label}"),
            Self::Call(target) => write!(f, "callq {target}"),
        }
    }
}
