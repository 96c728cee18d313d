//! Executes rewritten sequences on a small x86-64 stack machine and checks
//! they behave like the instructions they replace.

use std::collections::HashMap;

use bfence_ir::{BasicBlock, Function, Program, RelocationMode, TargetArch};
use bfence_pass::{LfenceConfig, LfenceInsertion};
use bfence_x86::{
    Base, DataForm, Gpr, Inst, JumpTarget, MemOperand, RegOrMem, Width, X86Encoder,
};

const CODE_BASE: u64 = 0x40_1000;
const STACK_TOP: u64 = 0x7fff_f000;
const TARGET: u64 = 0x50_0000;
const TABLE: u64 = 0x60_0000;

/// Register file plus byte-addressed memory.
#[derive(Default)]
struct Machine {
    regs: [u64; 16],
    mem: HashMap<u64, u8>,
}

impl Machine {
    fn new() -> Self {
        let mut m = Self::default();
        m.set(Gpr::Rsp, STACK_TOP);
        m
    }

    fn get(&self, reg: Gpr) -> u64 {
        self.regs[usize::from(reg.code())]
    }

    fn set(&mut self, reg: Gpr, value: u64) {
        self.regs[usize::from(reg.code())] = value;
    }

    fn read(&self, addr: u64) -> u64 {
        (0..8).fold(0, |acc, i| {
            acc | u64::from(self.mem.get(&(addr + i)).copied().unwrap_or(0)) << (8 * i)
        })
    }

    fn write(&mut self, addr: u64, value: u64) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.mem.insert(addr + i as u64, byte);
        }
    }

    fn push(&mut self, value: u64) {
        let sp = self.get(Gpr::Rsp) - 8;
        self.set(Gpr::Rsp, sp);
        self.write(sp, value);
    }

    fn pop(&mut self) -> u64 {
        let sp = self.get(Gpr::Rsp);
        self.set(Gpr::Rsp, sp + 8);
        self.read(sp)
    }

    fn address(&self, mem: &MemOperand, next_ip: u64) -> u64 {
        let base = match mem.base_reg() {
            Some(Base::Rip) => next_ip,
            Some(Base::Gpr(reg)) => self.get(reg),
            None => 0,
        };
        let index = mem
            .index()
            .map_or(0, |reg| self.get(reg) * u64::from(mem.scale().value()));
        let disp = mem.disp().as_imm().expect("numeric displacement");
        base.wrapping_add(index)
            .wrapping_add_signed(i64::from(disp))
    }

    /// Run `code` laid out at `CODE_BASE` until control leaves it.
    /// Returns the address control left to.
    fn run(&mut self, code: &[Inst]) -> u64 {
        let mut encoder = X86Encoder::new();
        let mut addrs = Vec::with_capacity(code.len());
        let mut addr = CODE_BASE;
        for inst in code {
            addrs.push(addr);
            addr += encoder.encode(inst).len() as u64;
        }
        let end = addr;

        let mut rip = CODE_BASE;
        for _ in 0..1000 {
            if !(CODE_BASE..end).contains(&rip) {
                return rip;
            }
            let idx = addrs
                .iter()
                .position(|&a| a == rip)
                .expect("jump into the middle of an instruction");
            let inst = &code[idx];
            let next = addrs.get(idx + 1).copied().unwrap_or(end);
            rip = self.step(inst, next);
        }
        panic!("sequence did not terminate");
    }

    fn step(&mut self, inst: &Inst, next: u64) -> u64 {
        match inst {
            Inst::Lfence | Inst::Nop => {}
            Inst::Push(reg) => self.push(self.get(*reg)),
            Inst::Pop(reg) => {
                let value = self.pop();
                self.set(*reg, value);
            }
            Inst::PushMem(mem) => self.push(self.read(self.address(mem, next))),
            Inst::Not {
                width: Width::Q,
                dst: RegOrMem::Mem(mem),
            } => {
                let addr = self.address(mem, next);
                self.write(addr, !self.read(addr));
            }
            Inst::Not {
                width: Width::Q,
                dst: RegOrMem::Reg(reg),
            } => self.set(*reg, !self.get(*reg)),
            Inst::Lea { src, dst } => self.set(*dst, self.address(src, next)),
            Inst::Mov {
                width: Width::Q,
                form: DataForm::RegMem { src, dst },
            } => self.write(self.address(dst, next), self.get(*src)),
            Inst::Mov {
                width: Width::Q,
                form: DataForm::MemReg { src, dst },
            } => self.set(*dst, self.read(self.address(src, next))),
            Inst::Ret => return self.pop(),
            Inst::Call(JumpTarget::Mem(mem)) => {
                let target = self.read(self.address(mem, next));
                self.push(next);
                return target;
            }
            Inst::Jmp(JumpTarget::Mem(mem)) => return self.read(self.address(mem, next)),
            other => panic!("unsupported instruction: {other}"),
        }
        next
    }
}

fn harden(insts: Vec<Inst>) -> Vec<Inst> {
    let mut program = Program::new(TargetArch::X86_64, RelocationMode::Relocations);
    program
        .add_function(Function::new("f").with_block(BasicBlock::with_instructions("f", insts)))
        .unwrap();
    LfenceInsertion::new(LfenceConfig::active())
        .run(&mut program)
        .unwrap();
    program.functions()[0].blocks()[0].instructions().to_vec()
}

fn code_size(code: &[Inst]) -> u64 {
    X86Encoder::new().encode_all(code).len() as u64
}

/// `%rip` displacement that reaches `TABLE` from a 6-byte instruction at
/// `CODE_BASE`.
const TABLE_FROM_CODE: u64 = TABLE - CODE_BASE - 6;

/// Machine with a function pointer reachable through every base the tests
/// use, including two caller stack slots.
fn machine_with_pointer() -> Machine {
    let mut m = Machine::new();
    m.set(Gpr::Rsi, TABLE);
    m.set(Gpr::Rbx, TABLE - 0x10);
    m.set(Gpr::R12, TABLE - 0x100);
    m.set(Gpr::Rax, TABLE - 3 * 8);
    m.set(Gpr::Rcx, 3);
    m.set(Gpr::Rdi, 0xdead_beef);
    m.write(TABLE, TARGET);
    m.write(STACK_TOP + 0x8, TARGET);
    m.write(STACK_TOP + 0x7c, TARGET);
    m
}

fn pointer_operands() -> Vec<MemOperand> {
    let rip = format!("{TABLE_FROM_CODE:#x}(%rip)");
    vec![
        "(%rsi)",
        "0x10(%rbx)",
        "0x100(%r12)",
        "(%rax,%rcx,8)",
        "0x8(%rsp)",
        "0x7c(%rsp)",
        rip.as_str(),
    ]
    .into_iter()
    .map(|text| {
        let Inst::PushMem(mem) = format!("pushq {text}").parse::<Inst>().unwrap() else {
            unreachable!()
        };
        mem
    })
    .collect()
}

#[test]
fn test_double_complement_is_identity() {
    for value in [
        0,
        1,
        u64::MAX,
        0x8000_0000_0000_0000,
        0x0123_4567_89ab_cdef,
        0x5555_5555_5555_5555,
    ] {
        let mut m = Machine::new();
        m.push(value);
        let code = harden(vec![Inst::Ret]);
        let target = m.run(&code);
        assert_eq!(target, value);
        assert_eq!(m.get(Gpr::Rsp), STACK_TOP);
    }
}

#[test]
fn test_rewritten_call_matches_call() {
    for mem in pointer_operands() {
        let call = Inst::call_mem(mem.clone());

        let mut original = machine_with_pointer();
        let original_target = original.run(std::slice::from_ref(&call));
        let original_return = original.read(original.get(Gpr::Rsp));
        assert_eq!(original_target, TARGET);
        assert_eq!(original_return, CODE_BASE + code_size(&[call.clone()]));

        let code = harden(vec![call]);
        let mut hardened = machine_with_pointer();
        let target = hardened.run(&code);

        assert_eq!(target, TARGET, "{mem}");
        assert_eq!(hardened.get(Gpr::Rsp), STACK_TOP - 8, "{mem}");
        // Return address is the instruction after the rewritten sequence.
        assert_eq!(
            hardened.read(hardened.get(Gpr::Rsp)),
            CODE_BASE + code_size(&code),
            "{mem}"
        );
        assert_eq!(hardened.get(Gpr::Rdi), 0xdead_beef, "{mem}");
    }
}

#[test]
fn test_rewritten_jump_matches_jump() {
    for mem in pointer_operands() {
        let code = harden(vec![Inst::jmp_mem(mem.clone())]);
        let mut m = machine_with_pointer();
        assert_eq!(m.run(&code), TARGET, "{mem}");
        assert_eq!(m.get(Gpr::Rsp), STACK_TOP, "{mem}");
    }
}

#[test]
fn test_fenced_load_reads_same_value() {
    let load: Inst = "movq 0x10(%rbx), %rdx".parse().unwrap();
    let code = harden(vec![load]);
    assert_eq!(code.len(), 2);
    let mut m = machine_with_pointer();
    m.run(&code);
    assert_eq!(m.get(Gpr::Rdx), TARGET);
}
