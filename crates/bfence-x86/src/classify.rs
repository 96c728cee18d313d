//! Speculation-relevant instruction predicates.
//!
//! All predicates are total: an instruction shape they do not recognise is
//! simply `false`.

use crate::inst::Inst;
use crate::operand::{Base, DataForm, Displacement, JumpTarget, MemOperand, RegOrMem, Scale};
use crate::reg::{Gpr, SegmentReg};

/// Check for a conditional branch (`jcc`).
#[must_use]
pub const fn is_conditional_branch(inst: &Inst) -> bool {
    matches!(inst, Inst::Jcc { .. })
}

/// Check if the instruction reads an explicit memory operand.
///
/// Implicit stack reads (`pop`, `ret`) do not count, nor does `lea`, which
/// only computes an address. Stores count only when the instruction also
/// reads the destination (`add %rax, (%rbx)`), plain `mov` stores do not.
#[must_use]
pub const fn is_load(inst: &Inst) -> bool {
    match inst {
        Inst::Mov { form, .. } => matches!(form, DataForm::MemReg { .. }),
        Inst::Alu { form, .. } => form.mem().is_some(),
        Inst::PushMem(_)
        | Inst::Not {
            dst: RegOrMem::Mem(_),
            ..
        }
        | Inst::Call(JumpTarget::Mem(_))
        | Inst::Jmp(JumpTarget::Mem(_)) => true,
        _ => false,
    }
}

/// Check for a near return.
#[must_use]
pub const fn is_return(inst: &Inst) -> bool {
    matches!(inst, Inst::Ret)
}

/// Check for a call through a register or memory.
#[must_use]
pub const fn is_indirect_call(inst: &Inst) -> bool {
    matches!(inst, Inst::Call(target) if target.is_indirect())
}

/// Check for a jump through a register or memory.
#[must_use]
pub const fn is_indirect_branch(inst: &Inst) -> bool {
    matches!(inst, Inst::Jmp(target) if target.is_indirect())
}

/// Check for a load-ordering barrier.
#[must_use]
pub const fn is_barrier(inst: &Inst) -> bool {
    matches!(inst, Inst::Lfence)
}

/// Kind of control transfer described by [`IndirectBranchInfo`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferKind {
    Call,
    Jump,
}

/// Addressing components of a memory-indirect call or jump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndirectBranchInfo<'a> {
    kind: TransferKind,
    mem: &'a MemOperand,
}

impl<'a> IndirectBranchInfo<'a> {
    /// Analyze a control transfer. Returns `None` unless the target is read
    /// from memory.
    #[must_use]
    pub const fn analyze(inst: &'a Inst) -> Option<Self> {
        match inst {
            Inst::Call(JumpTarget::Mem(mem)) => Some(Self {
                kind: TransferKind::Call,
                mem,
            }),
            Inst::Jmp(JumpTarget::Mem(mem)) => Some(Self {
                kind: TransferKind::Jump,
                mem,
            }),
            _ => None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> TransferKind {
        self.kind
    }

    #[must_use]
    pub const fn base(&self) -> Option<Base> {
        self.mem.base_reg()
    }

    #[must_use]
    pub const fn index(&self) -> Option<Gpr> {
        self.mem.index()
    }

    #[must_use]
    pub const fn scale(&self) -> Scale {
        self.mem.scale()
    }

    #[must_use]
    pub const fn displacement(&self) -> &'a Displacement {
        self.mem.disp()
    }

    #[must_use]
    pub const fn segment(&self) -> Option<SegmentReg> {
        self.mem.segment()
    }

    /// The full memory operand, for re-use in synthesized instructions.
    #[must_use]
    pub const fn memory_operand(&self) -> &'a MemOperand {
        self.mem
    }
}
