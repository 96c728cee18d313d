//! x86-64 machine-code encoder.
//!
//! Encodes the instruction model to bytes so synthesized sequences can be
//! measured exactly. Direct branch and call targets are symbolic here and are
//! always encoded in their rel32 form; symbolic displacements always use
//! disp32. Relaxation and relocation are left to the final re-encoder.

use crate::inst::{AluOp, Inst};
use crate::operand::{Base, DataForm, Displacement, JumpTarget, MemOperand, RegOrMem};
use crate::reg::{Gpr, Width};

/// Measures the encoded size of instruction sequences.
pub trait CodeSizeOracle {
    /// Number of bytes `insts` occupy once encoded.
    fn code_size(&mut self, insts: &[Inst]) -> u64;
}

/// Encoder with a private scratch buffer.
///
/// Cheap to create and `Send`; give each worker its own.
#[derive(Debug, Default)]
pub struct X86Encoder {
    buf: Vec<u8>,
}

/// `r/m` operand of a ModR/M-encoded instruction.
#[derive(Clone, Copy)]
enum Rm<'a> {
    Reg(Gpr),
    Mem(&'a MemOperand),
}

/// Prefix requirements of a ModR/M-encoded instruction.
#[derive(Clone, Copy, Default)]
struct Prefixes {
    rex_w: bool,
    opsize: bool,
    force_rex: bool,
}

impl Prefixes {
    const DEFAULT_64: Self = Self {
        rex_w: false,
        opsize: false,
        force_rex: false,
    };

    const fn for_width(width: Width) -> Self {
        Self {
            rex_w: matches!(width, Width::Q),
            opsize: matches!(width, Width::W),
            force_rex: false,
        }
    }

    /// Byte operations on spl/bpl/sil/dil need a REX prefix even when empty.
    const fn with_byte_regs(mut self, width: Width, regs: &[Gpr]) -> Self {
        if matches!(width, Width::B) {
            let mut i = 0;
            while i < regs.len() {
                if regs[i].byte_needs_rex() {
                    self.force_rex = true;
                }
                i += 1;
            }
        }
        self
    }
}

const fn modrm(md: u8, reg: u8, rm: u8) -> u8 {
    (md << 6) | ((reg & 7) << 3) | (rm & 7)
}

const fn sib(scale: u8, index: u8, base: u8) -> u8 {
    (scale << 6) | ((index & 7) << 3) | (base & 7)
}

const fn fits_i8(v: i32) -> bool {
    v >= i8::MIN as i32 && v <= i8::MAX as i32
}

impl X86Encoder {
    #[must_use]
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Encode one instruction, returning its bytes.
    pub fn encode(&mut self, inst: &Inst) -> &[u8] {
        self.buf.clear();
        self.emit_inst(inst);
        &self.buf
    }

    /// Encode a sequence, returning the concatenated bytes.
    pub fn encode_all<'a>(&mut self, insts: impl IntoIterator<Item = &'a Inst>) -> &[u8] {
        self.buf.clear();
        for inst in insts {
            self.emit_inst(inst);
        }
        &self.buf
    }

    // ========================================================================
    // Instruction dispatch
    // ========================================================================

    fn emit_inst(&mut self, inst: &Inst) {
        match inst {
            Inst::Lfence => self.buf.extend_from_slice(&[0x0F, 0xAE, 0xE8]),
            Inst::Nop => self.buf.push(0x90),
            Inst::Ret => self.buf.push(0xC3),
            Inst::Push(reg) => self.emit_opcode_reg(Prefixes::DEFAULT_64, 0x50, *reg),
            Inst::Pop(reg) => self.emit_opcode_reg(Prefixes::DEFAULT_64, 0x58, *reg),
            Inst::PushMem(mem) => self.emit_rm(Prefixes::DEFAULT_64, &[0xFF], 6, Rm::Mem(mem)),
            Inst::Not { width, dst } => {
                let opcode = if *width == Width::B { 0xF6 } else { 0xF7 };
                let (prefixes, rm) = match dst {
                    RegOrMem::Reg(reg) => (
                        Prefixes::for_width(*width).with_byte_regs(*width, &[*reg]),
                        Rm::Reg(*reg),
                    ),
                    RegOrMem::Mem(mem) => (Prefixes::for_width(*width), Rm::Mem(mem)),
                };
                self.emit_rm(prefixes, &[opcode], 2, rm);
            }
            Inst::Lea { src, dst } => {
                self.emit_rm(Prefixes::for_width(Width::Q), &[0x8D], dst.code(), Rm::Mem(src));
            }
            Inst::Mov { width, form } => self.emit_mov(*width, form),
            Inst::MovAbs { imm, dst } => {
                self.emit_opcode_reg(Prefixes::for_width(Width::Q), 0xB8, *dst);
                self.buf.extend_from_slice(&imm.to_le_bytes());
            }
            Inst::Alu { op, width, form } => self.emit_alu(*op, *width, form),
            Inst::Jcc { cond, .. } => {
                self.buf.extend_from_slice(&[0x0F, 0x80 | cond.code()]);
                self.emit_rel32();
            }
            Inst::Jmp(target) => self.emit_transfer(target, 0xE9, 4),
            Inst::Call(target) => self.emit_transfer(target, 0xE8, 2),
        }
    }

    fn emit_transfer(&mut self, target: &JumpTarget, direct_opcode: u8, ext: u8) {
        match target {
            JumpTarget::Direct(_) => {
                self.buf.push(direct_opcode);
                self.emit_rel32();
            }
            JumpTarget::Reg(reg) => self.emit_rm(Prefixes::DEFAULT_64, &[0xFF], ext, Rm::Reg(*reg)),
            JumpTarget::Mem(mem) => self.emit_rm(Prefixes::DEFAULT_64, &[0xFF], ext, Rm::Mem(mem)),
        }
    }

    fn emit_mov(&mut self, width: Width, form: &DataForm) {
        let byte = width == Width::B;
        let store_op = if byte { 0x88 } else { 0x89 };
        let load_op = if byte { 0x8A } else { 0x8B };
        let base = Prefixes::for_width(width);
        match form {
            DataForm::RegReg { src, dst } => self.emit_rm(
                base.with_byte_regs(width, &[*src, *dst]),
                &[store_op],
                src.code(),
                Rm::Reg(*dst),
            ),
            DataForm::MemReg { src, dst } => self.emit_rm(
                base.with_byte_regs(width, &[*dst]),
                &[load_op],
                dst.code(),
                Rm::Mem(src),
            ),
            DataForm::RegMem { src, dst } => self.emit_rm(
                base.with_byte_regs(width, &[*src]),
                &[store_op],
                src.code(),
                Rm::Mem(dst),
            ),
            DataForm::ImmReg { imm, dst } => {
                if width == Width::Q {
                    // Sign-extended imm32 form; movabs covers the rest.
                    self.emit_rm(base, &[0xC7], 0, Rm::Reg(*dst));
                    self.emit_imm(Width::D, *imm);
                } else {
                    let opcode = if byte { 0xB0 } else { 0xB8 };
                    self.emit_opcode_reg(base.with_byte_regs(width, &[*dst]), opcode, *dst);
                    self.emit_imm(width, *imm);
                }
            }
            DataForm::ImmMem { imm, dst } => {
                let opcode = if byte { 0xC6 } else { 0xC7 };
                self.emit_rm(base, &[opcode], 0, Rm::Mem(dst));
                self.emit_imm(width, *imm);
            }
        }
    }

    fn emit_alu(&mut self, op: AluOp, width: Width, form: &DataForm) {
        let byte = width == Width::B;
        let wide_bit = u8::from(!byte);
        let base = Prefixes::for_width(width);
        let (rr_op, load_op) = match op.group1_ext() {
            Some(ext) => ((ext << 3) | wide_bit, (ext << 3) | 2 | wide_bit),
            // test is symmetric and has no reversed form.
            None => (0x84 | wide_bit, 0x84 | wide_bit),
        };
        match form {
            DataForm::RegReg { src, dst } => self.emit_rm(
                base.with_byte_regs(width, &[*src, *dst]),
                &[rr_op],
                src.code(),
                Rm::Reg(*dst),
            ),
            DataForm::MemReg { src, dst } => self.emit_rm(
                base.with_byte_regs(width, &[*dst]),
                &[load_op],
                dst.code(),
                Rm::Mem(src),
            ),
            DataForm::RegMem { src, dst } => self.emit_rm(
                base.with_byte_regs(width, &[*src]),
                &[rr_op],
                src.code(),
                Rm::Mem(dst),
            ),
            DataForm::ImmReg { imm, dst } => {
                let prefixes = base.with_byte_regs(width, &[*dst]);
                self.emit_alu_imm(op, width, prefixes, *imm, Rm::Reg(*dst));
            }
            DataForm::ImmMem { imm, dst } => {
                self.emit_alu_imm(op, width, base, *imm, Rm::Mem(dst));
            }
        }
    }

    fn emit_alu_imm(&mut self, op: AluOp, width: Width, prefixes: Prefixes, imm: i32, rm: Rm<'_>) {
        let byte = width == Width::B;
        let wide_bit = u8::from(!byte);
        let accumulator = matches!(rm, Rm::Reg(Gpr::Rax));
        match op.group1_ext() {
            Some(ext) if !byte && fits_i8(imm) => {
                self.emit_rm(prefixes, &[0x83], ext, rm);
                self.emit_imm(Width::B, imm);
            }
            Some(ext) if accumulator => {
                self.emit_prefixes(prefixes, false, false, false);
                self.buf.push((ext << 3) | 4 | wide_bit);
                self.emit_imm(width, imm);
            }
            Some(ext) => {
                self.emit_rm(prefixes, &[0x80 | wide_bit], ext, rm);
                self.emit_imm(width, imm);
            }
            None if accumulator => {
                self.emit_prefixes(prefixes, false, false, false);
                self.buf.push(0xA8 | wide_bit);
                self.emit_imm(width, imm);
            }
            None => {
                self.emit_rm(prefixes, &[0xF6 | wide_bit], 0, rm);
                self.emit_imm(width, imm);
            }
        }
    }

    // ========================================================================
    // Encoding helpers
    // ========================================================================

    /// Emit operand-size and REX prefixes.
    fn emit_prefixes(&mut self, prefixes: Prefixes, r: bool, x: bool, b: bool) {
        if prefixes.opsize {
            self.buf.push(0x66);
        }
        let rex = 0x40
            | (u8::from(prefixes.rex_w) << 3)
            | (u8::from(r) << 2)
            | (u8::from(x) << 1)
            | u8::from(b);
        if rex != 0x40 || prefixes.force_rex {
            self.buf.push(rex);
        }
    }

    /// Opcode with the register in its low three bits (`push`, `pop`, `mov imm`).
    fn emit_opcode_reg(&mut self, prefixes: Prefixes, opcode: u8, reg: Gpr) {
        self.emit_prefixes(prefixes, false, false, reg.is_extended());
        self.buf.push(opcode | reg.low3());
    }

    /// Prefixes, opcode and ModR/M (+ SIB + displacement).
    fn emit_rm(&mut self, prefixes: Prefixes, opcode: &[u8], reg: u8, rm: Rm<'_>) {
        let r = reg >= 8;
        match rm {
            Rm::Reg(rm_reg) => {
                self.emit_prefixes(prefixes, r, false, rm_reg.is_extended());
                self.buf.extend_from_slice(opcode);
                self.buf.push(modrm(0b11, reg, rm_reg.low3()));
            }
            Rm::Mem(mem) => {
                if let Some(seg) = mem.segment() {
                    self.buf.push(seg.prefix());
                }
                let x = mem.index().is_some_and(Gpr::is_extended);
                let b = matches!(mem.base_reg(), Some(Base::Gpr(base)) if base.is_extended());
                self.emit_prefixes(prefixes, r, x, b);
                self.buf.extend_from_slice(opcode);
                self.emit_mem(reg, mem);
            }
        }
    }

    fn emit_mem(&mut self, reg: u8, mem: &MemOperand) {
        let disp = mem.disp();
        let scale = mem.scale().bits();
        let base = match (mem.base_reg(), mem.index()) {
            (Some(Base::Rip), _) => {
                self.buf.push(modrm(0b00, reg, 0b101));
                self.emit_disp32(disp);
                return;
            }
            (None, None) => {
                self.buf.push(modrm(0b00, reg, 0b100));
                self.buf.push(sib(0, 0b100, 0b101));
                self.emit_disp32(disp);
                return;
            }
            (None, Some(index)) => {
                self.buf.push(modrm(0b00, reg, 0b100));
                self.buf.push(sib(scale, index.low3(), 0b101));
                self.emit_disp32(disp);
                return;
            }
            (Some(Base::Gpr(base)), _) => base,
        };

        // rbp/r13 as base always need a displacement; rsp/r12 always need SIB.
        let md = match disp {
            Displacement::Imm(0) if base.low3() != 0b101 => 0b00,
            Displacement::Imm(v) if fits_i8(*v) => 0b01,
            _ => 0b10,
        };
        match mem.index() {
            Some(index) => {
                self.buf.push(modrm(md, reg, 0b100));
                self.buf.push(sib(scale, index.low3(), base.low3()));
            }
            None if base.low3() == 0b100 => {
                self.buf.push(modrm(md, reg, 0b100));
                self.buf.push(sib(0, 0b100, 0b100));
            }
            None => self.buf.push(modrm(md, reg, base.low3())),
        }
        match (md, disp) {
            (0b01, Displacement::Imm(v)) => self.emit_imm(Width::B, *v),
            (0b10, _) => self.emit_disp32(disp),
            _ => {}
        }
    }

    fn emit_disp32(&mut self, disp: &Displacement) {
        let value = match disp {
            Displacement::Imm(v) => *v,
            Displacement::Symbol { addend, .. } => *addend,
        };
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Immediate of the operand width; 64-bit operations take a
    /// sign-extended imm32.
    fn emit_imm(&mut self, width: Width, imm: i32) {
        let len = usize::from(width.bytes().min(4));
        self.buf.extend_from_slice(&imm.to_le_bytes()[..len]);
    }

    /// Placeholder rel32 for a symbolic target.
    fn emit_rel32(&mut self) {
        self.buf.extend_from_slice(&[0; 4]);
    }
}

impl CodeSizeOracle for X86Encoder {
    fn code_size(&mut self, insts: &[Inst]) -> u64 {
        self.encode_all(insts).len() as u64
    }
}
