//! Per-block rewriting.
//!
//! Each block is walked with an index cursor. After a rewrite the cursor
//! moves past everything that was inserted, so no instruction is looked at
//! twice.

use std::slice;

use bfence_ir::{BasicBlock, Function};
use bfence_x86::{
    Base, CodeSizeOracle, IndirectBranchInfo, Inst, InstBuilder, MemOperand, is_barrier,
    is_conditional_branch, is_indirect_branch, is_indirect_call, is_load, is_return,
};
use tracing::warn;

use crate::config::LfenceConfig;
use crate::stats::MitigationStats;

/// Bytes from the end of the return-address `lea` to the end of the
/// rewritten call, excluding the pushed memory operand:
/// `movq` (5) + `popq` (1) + `lfence` (3) + 2 x `notq` (8) + `lfence` (3) + `retq` (1).
///
/// `push mem` and `call *mem` share their ModR/M bytes, so the full
/// displacement is this plus the size of the original call, unless a
/// `%rsp` operand had to be moved into a longer displacement form.
pub const RETURN_ADDRESS_FIXED_BYTES: u64 = 0x15;

/// Stack slot pushed ahead of the call target in the rewritten call.
const RETURN_SLOT_BYTES: i32 = 8;

/// Mitigation rule, in the order rules are tried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rule {
    ConditionalBranch,
    Load,
    Return,
    IndirectCall,
    IndirectJump,
}

impl Rule {
    pub const ALL: [Self; 5] = [
        Self::ConditionalBranch,
        Self::Load,
        Self::Return,
        Self::IndirectCall,
        Self::IndirectJump,
    ];

    /// Report label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ConditionalBranch => "branches",
            Self::Load => "loads",
            Self::Return => "returns",
            Self::IndirectCall => "indirect calls",
            Self::IndirectJump => "indirect jumps",
        }
    }

    const fn is_enabled(self, config: &LfenceConfig) -> bool {
        match self {
            Self::ConditionalBranch => config.conditional_branches,
            Self::Load => config.loads,
            Self::Return => config.returns,
            Self::IndirectCall => config.indirect_calls,
            Self::IndirectJump => config.indirect_jumps,
        }
    }
}

/// First enabled rule that applies to `inst`.
///
/// A disabled rule does not stop the search, so its instruction may still
/// match a later rule (or none).
#[must_use]
pub fn select_rule(inst: &Inst, config: &LfenceConfig) -> Option<Rule> {
    let load = is_load(inst);
    let indirect_call = is_indirect_call(inst);
    let indirect_branch = is_indirect_branch(inst);
    let applies = |rule: Rule| match rule {
        Rule::ConditionalBranch => is_conditional_branch(inst),
        Rule::Load => load && !indirect_branch && !indirect_call,
        Rule::Return => is_return(inst) && !indirect_branch,
        Rule::IndirectCall => indirect_call && load && !indirect_branch,
        Rule::IndirectJump => indirect_branch && load,
    };
    Rule::ALL
        .into_iter()
        .find(|&rule| rule.is_enabled(config) && applies(rule))
}

/// Harden every block of `function`.
pub(crate) fn harden_function<O: CodeSizeOracle>(
    function: &mut Function<Inst>,
    config: &LfenceConfig,
    oracle: &mut O,
) -> MitigationStats {
    let mut stats = MitigationStats::default();
    for block in function.blocks_mut() {
        harden_block(block, config, oracle, &mut stats);
    }
    stats
}

/// Apply the mitigation rules to one block.
pub(crate) fn harden_block<O: CodeSizeOracle>(
    block: &mut BasicBlock<Inst>,
    config: &LfenceConfig,
    oracle: &mut O,
    stats: &mut MitigationStats,
) {
    let builder = InstBuilder::new();
    let mut last_was_barrier = false;
    let mut pos = 0;

    while let Some(inst) = block.get(pos) {
        let Some(rule) = select_rule(inst, config) else {
            last_was_barrier = is_barrier(inst);
            pos += 1;
            continue;
        };

        pos = match rule {
            Rule::ConditionalBranch => {
                let at = if last_was_barrier {
                    pos
                } else {
                    block.insert_before(pos, builder.create_lfence())
                };
                last_was_barrier = false;
                at + 1
            }
            Rule::Load => {
                last_was_barrier = true;
                block.insert_after(pos, builder.create_lfence()) + 1
            }
            Rule::Return => {
                last_was_barrier = false;
                block.insert_all_before(pos, builder.create_stack_top_fence()) + 1
            }
            Rule::IndirectCall | Rule::IndirectJump => {
                last_was_barrier = false;
                let seq = if rule == Rule::IndirectCall {
                    indirect_call_sequence(inst, builder, oracle)
                } else {
                    indirect_jump_sequence(inst, builder)
                };
                let Some(seq) = seq else {
                    warn!(block = block.label(), %inst, "cannot rewrite, left unhardened");
                    pos += 1;
                    continue;
                };
                block.replace(pos, seq).map_or(pos, |last| last + 1)
            }
        };
        stats.record(rule);
    }
}

/// `call *mem` becomes a fenced `push; ret` with a synthesized return
/// address:
///
/// ```text
/// pushq %rdi              # slot for the return address
/// pushq %rdi              # save scratch
/// leaq  D(%rip), %rdi     # address after the final retq
/// movq  %rdi, 8(%rsp)
/// popq  %rdi
/// lfence
/// pushq mem               # call target
/// notq  (%rsp)
/// notq  (%rsp)
/// lfence
/// retq
/// ```
fn indirect_call_sequence<O: CodeSizeOracle>(
    call: &Inst,
    builder: InstBuilder,
    oracle: &mut O,
) -> Option<Vec<Inst>> {
    let info = IndirectBranchInfo::analyze(call)?;
    let scratch = builder.int_arg_register(0)?;

    // `%rip` displacements are always 32 bits wide, so the placeholder
    // `lea` has its final size.
    let mut seq = vec![
        builder.create_push_register(scratch),
        builder.create_push_register(scratch),
        builder.create_lea_rip(0, scratch),
        builder.create_save_to_stack(scratch, RETURN_SLOT_BYTES),
        builder.create_pop_register(scratch),
        builder.create_lfence(),
    ];
    let target = call_target_operand(&info, builder, oracle.code_size(&seq))?;
    let push = builder.create_push_memory(&target);
    let push_size = oracle.code_size(slice::from_ref(&push));

    seq.push(push);
    seq.extend(builder.create_stack_top_fence());
    seq.push(builder.create_return());

    let disp = oracle.code_size(&seq[3..]);
    debug_assert_eq!(
        disp,
        RETURN_ADDRESS_FIXED_BYTES + push_size,
        "return address displacement out of sync with {call}"
    );
    seq[2] = builder.create_lea_rip(i32::try_from(disp).ok()?, scratch);
    Some(seq)
}

/// Operand of the `pushq` that loads the call target.
///
/// The push runs with the return slot already on the stack and
/// `prefix_len` bytes after the original call site, so `%rsp` and numeric
/// `%rip` displacements are moved to address the same memory. Symbolic
/// `%rip` displacements resolve against the push itself.
fn call_target_operand(
    info: &IndirectBranchInfo<'_>,
    builder: InstBuilder,
    prefix_len: u64,
) -> Option<MemOperand> {
    let mem = info.memory_operand();
    let delta = match (info.base(), info.displacement().as_imm()) {
        (Some(Base::Gpr(reg)), _) if reg == builder.stack_pointer() => RETURN_SLOT_BYTES,
        (Some(Base::Rip), Some(_)) => i32::try_from(prefix_len).ok()?.checked_neg()?,
        _ => return Some(mem.clone()),
    };
    let disp = info.displacement().offset_by(delta)?;
    Some(mem.clone().with_disp(disp))
}

/// `jmp *mem` becomes `pushq mem; notq (%rsp); notq (%rsp); lfence; retq`.
fn indirect_jump_sequence(jump: &Inst, builder: InstBuilder) -> Option<Vec<Inst>> {
    let info = IndirectBranchInfo::analyze(jump)?;
    let mut seq = vec![builder.create_push_memory(info.memory_operand())];
    seq.extend(builder.create_stack_top_fence());
    seq.push(builder.create_return());
    Some(seq)
}
