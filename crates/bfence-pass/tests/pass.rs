use bfence_ir::{BasicBlock, Function, Program, RelocationMode, TargetArch};
use bfence_pass::{
    FunctionFilter, LfenceConfig, LfenceInsertion, MitigationStats, Parallelism, PassError, Rule,
};
use bfence_x86::{
    Inst, is_conditional_branch, is_indirect_branch, is_indirect_call, is_load, is_return,
};

fn insts(lines: &[&str]) -> Vec<Inst> {
    lines
        .iter()
        .map(|line| line.parse().unwrap_or_else(|e| panic!("{line}: {e}")))
        .collect()
}

fn function(name: &str, blocks: &[(&str, &[&str])]) -> Function<Inst> {
    blocks.iter().fold(Function::new(name), |f, (label, lines)| {
        f.with_block(BasicBlock::with_instructions(*label, insts(lines)))
    })
}

/// A program touching every rule.
fn sample_program() -> Program<Inst> {
    let mut program = Program::default();
    program
        .add_function(function(
            "dispatch",
            &[
                (
                    "dispatch",
                    &[
                        "pushq %rbx",
                        "movq 0x8(%rdi), %rax",
                        "cmpq $0x10, %rax",
                        "ja .Ldefault",
                    ],
                ),
                (".Ltable", &["jmpq *jump_table(,%rax,8)"]),
                (
                    ".Ldefault",
                    &["callq *0x18(%rdi)", "callq *%rax", "popq %rbx", "retq"],
                ),
            ],
        ))
        .unwrap();
    program
        .add_function(function(
            "checked_read",
            &[
                (
                    "checked_read",
                    &["cmpq %rsi, %rdx", "jae .Lout", "lfence", "jb .Lin"],
                ),
                (".Lin", &["movl (%rdi,%rdx,4), %eax", "retq"]),
                (".Lout", &["xorl %eax, %eax", "retq"]),
            ],
        ))
        .unwrap();
    program
}

fn run(program: &mut Program<Inst>, config: LfenceConfig) -> MitigationStats {
    LfenceInsertion::new(config).run(program).unwrap()
}

fn count(program: &Program<Inst>, pred: impl Fn(&Inst) -> bool) -> usize {
    program
        .functions()
        .iter()
        .flat_map(Function::instructions)
        .filter(|inst| pred(inst))
        .count()
}

#[test]
fn test_disabled_pass_is_noop() {
    let mut program = sample_program();
    let before = program.clone();
    let stats = run(&mut program, LfenceConfig::default());
    assert!(stats.is_empty());
    assert_eq!(program, before);

    // Preconditions are only checked once the pass is enabled.
    program.set_target(TargetArch::AArch64);
    assert!(
        LfenceInsertion::new(LfenceConfig::default())
            .run(&mut program)
            .is_ok()
    );
}

#[test]
fn test_unsupported_target_fails_before_mutation() {
    let mut program = sample_program();
    program.set_target(TargetArch::RiscV64);
    let before = program.clone();
    let err = LfenceInsertion::new(LfenceConfig::active())
        .run(&mut program)
        .unwrap_err();
    assert!(matches!(err, PassError::UnsupportedTarget(TargetArch::RiscV64)));
    assert_eq!(program, before);
}

#[test]
fn test_relocations_required() {
    let mut program = sample_program();
    program.set_relocation_mode(RelocationMode::NoRelocations);
    let before = program.clone();
    let err = LfenceInsertion::new(LfenceConfig::active())
        .run(&mut program)
        .unwrap_err();
    assert!(matches!(err, PassError::RelocationsRequired));
    assert_eq!(program, before);
}

#[test]
fn test_counter_accuracy() {
    let mut program = sample_program();
    let input = program.clone();
    let stats = run(&mut program, LfenceConfig::active());

    assert_eq!(stats.get(Rule::ConditionalBranch), 3);
    assert_eq!(stats.loads, 2);
    assert_eq!(
        stats.branches as usize,
        count(&input, is_conditional_branch)
    );
    assert_eq!(
        stats.loads as usize,
        count(&input, |i| is_load(i)
            && !is_indirect_call(i)
            && !is_indirect_branch(i))
    );
    assert_eq!(stats.returns as usize, count(&input, is_return));
    assert_eq!(
        stats.indirect_calls as usize,
        count(&input, |i| is_indirect_call(i) && is_load(i))
    );
    assert_eq!(
        stats.indirect_jumps as usize,
        count(&input, |i| is_indirect_branch(i) && is_load(i))
    );

    // No memory-indirect transfer survives; register-indirect ones do.
    assert_eq!(
        count(&program, |i| (is_indirect_call(i) || is_indirect_branch(i)) && is_load(i)),
        0
    );
    assert_eq!(count(&program, is_indirect_call), 1);
}

#[test]
fn test_survey_matches_run() {
    let mut program = sample_program();
    let pass = LfenceInsertion::new(LfenceConfig::active());
    let surveyed = pass.survey(&program);
    let stats = pass.run(&mut program).unwrap();
    assert_eq!(surveyed, stats);
}

#[test]
fn test_branch_fences_are_idempotent() {
    let config = LfenceConfig::active()
        .with_loads(false)
        .with_returns(false)
        .with_indirect_calls(false)
        .with_indirect_jumps(false);
    let mut program = sample_program();
    let first = run(&mut program, config.clone());
    let once = program.clone();
    let second = run(&mut program, config);

    assert_eq!(program, once);
    assert_eq!(first.branches, second.branches);
    assert_eq!(first.total(), first.branches);
}

#[test]
fn test_existing_fence_is_not_duplicated() {
    let mut program = sample_program();
    run(&mut program, LfenceConfig::active());
    let block = &program.function("checked_read").unwrap().blocks()[0];
    let text: Vec<_> = block.iter().map(ToString::to_string).collect();
    assert_eq!(
        text,
        [
            "cmpq %rsi, %rdx",
            "lfence",
            "jae .Lout",
            "lfence",
            "jb .Lin"
        ]
    );
}

#[test]
fn test_ignored_and_filtered_functions_are_untouched() {
    let mut program = sample_program();
    program
        .function_mut("dispatch")
        .unwrap()
        .set_ignored(true);
    let before = program.clone();

    let stats = run(&mut program, LfenceConfig::active());
    assert_eq!(program.function("dispatch"), before.function("dispatch"));
    assert_ne!(program.function("checked_read"), before.function("checked_read"));
    assert_eq!(stats.indirect_calls, 0);

    let mut program = sample_program();
    let before = program.clone();
    let config =
        LfenceConfig::active().with_filter(FunctionFilter::new().with_skip(["checked_read"]));
    run(&mut program, config);
    assert_eq!(program.function("checked_read"), before.function("checked_read"));

    let mut program = sample_program();
    let config =
        LfenceConfig::active().with_filter(FunctionFilter::new().with_only(["checked_read"]));
    run(&mut program, config);
    assert_eq!(program.function("dispatch"), before.function("dispatch"));
}

#[test]
fn test_parallel_matches_serial() {
    let build = || {
        let mut program = Program::new(TargetArch::X86_64, RelocationMode::Relocations);
        for i in 0..64 {
            program
                .add_function(function(
                    &format!("f{i}"),
                    &[(
                        "entry",
                        &[
                            "movq (%rdi), %rax",
                            "testq %rax, %rax",
                            "je .Lnull",
                            "callq *0x8(%rax)",
                            "jmpq *(%rsi)",
                        ],
                    )],
                ))
                .unwrap();
        }
        program
    };

    let mut serial = build();
    let serial_stats = run(&mut serial, LfenceConfig::active());

    let mut parallel = build();
    let parallel_stats = run(
        &mut parallel,
        LfenceConfig::active().with_parallelism(Parallelism::Threads(4)),
    );

    assert_eq!(serial_stats, parallel_stats);
    assert_eq!(serial, parallel);
    assert_eq!(serial_stats.indirect_calls, 64);
}
