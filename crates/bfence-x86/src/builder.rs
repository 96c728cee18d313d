//! Instruction synthesis.
//!
//! The hardening pass builds every new instruction through `InstBuilder`,
//! so it never spells out operand shapes itself.

use crate::inst::Inst;
use crate::operand::{Displacement, MemOperand, RegOrMem};
use crate::reg::{Gpr, INT_ARG_REGS, Width};

/// Builder for the fixed instruction shapes used by mitigations.
#[derive(Clone, Copy, Debug, Default)]
pub struct InstBuilder;

#[allow(clippy::unused_self)]
impl InstBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Stack pointer register.
    #[must_use]
    pub const fn stack_pointer(self) -> Gpr {
        Gpr::Rsp
    }

    /// Integer argument register `n` of the System V calling convention.
    #[must_use]
    pub fn int_arg_register(self, n: usize) -> Option<Gpr> {
        INT_ARG_REGS.get(n).copied()
    }

    /// `lfence`.
    #[must_use]
    pub const fn create_lfence(self) -> Inst {
        Inst::Lfence
    }

    /// `retq`.
    #[must_use]
    pub const fn create_return(self) -> Inst {
        Inst::Ret
    }

    /// `pushq %reg`.
    #[must_use]
    pub const fn create_push_register(self, reg: Gpr) -> Inst {
        Inst::Push(reg)
    }

    /// `popq %reg`.
    #[must_use]
    pub const fn create_pop_register(self, reg: Gpr) -> Inst {
        Inst::Pop(reg)
    }

    /// `pushq mem`, preserving every addressing component of `mem`.
    #[must_use]
    pub fn create_push_memory(self, mem: &MemOperand) -> Inst {
        Inst::PushMem(mem.clone())
    }

    /// `notq disp(%rsp)`.
    #[must_use]
    pub const fn create_not_stack(self, offset: i32) -> Inst {
        Inst::Not {
            width: Width::Q,
            dst: RegOrMem::Mem(MemOperand::base_disp(self.stack_pointer(), offset)),
        }
    }

    /// `leaq disp(%rip), %reg`.
    #[must_use]
    pub const fn create_lea_rip(self, disp: i32, dst: Gpr) -> Inst {
        Inst::Lea {
            src: MemOperand::rip(Displacement::Imm(disp)),
            dst,
        }
    }

    /// `movq %reg, disp(%rsp)`.
    #[must_use]
    pub const fn create_save_to_stack(self, reg: Gpr, offset: i32) -> Inst {
        Inst::store(Width::Q, reg, MemOperand::base_disp(self.stack_pointer(), offset))
    }

    /// `notq (%rsp); notq (%rsp); lfence`.
    ///
    /// Touches the return slot twice so it is read and written back before
    /// the barrier; the value itself is unchanged.
    #[must_use]
    pub const fn create_stack_top_fence(self) -> [Inst; 3] {
        [
            self.create_not_stack(0),
            self.create_not_stack(0),
            self.create_lfence(),
        ]
    }
}
