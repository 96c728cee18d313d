//! AT&T syntax parser for the instruction model.
//!
//! Accepts what `Inst`'s `Display` prints plus the usual variations of
//! hand-written and objdump-style listings: optional width suffixes,
//! decimal or hex immediates, symbolic displacements and `*` indirection.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::inst::{AluOp, CondCode, Inst};
use crate::operand::{Base, DataForm, Displacement, JumpTarget, MemOperand, RegOrMem, Scale};
use crate::reg::{Gpr, SegmentReg, Width};
use crate::{OperandError, ParseError, Result};

static MEM_PATTERN: OnceLock<Regex> = OnceLock::new();
static SYMBOL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn mem_pattern() -> &'static Regex {
    MEM_PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:%([a-z]{2})\s*:\s*)?([^(]*?)\s*(?:\(\s*(?:%([a-z0-9]+))?\s*(?:,\s*%([a-z0-9]+)\s*(?:,\s*(\d+))?)?\s*\))?$",
        )
        .unwrap()
    })
}

fn symbol_pattern() -> &'static Regex {
    SYMBOL_PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z_.$][\w.$@]*)(?:\s*([+-])\s*(\w+))?$").unwrap()
    })
}

/// Parsed operand before the mnemonic decides what it means.
#[derive(Debug)]
enum Operand {
    Reg(Gpr, Width),
    Imm(i64),
    Mem(MemOperand),
    Label(String),
    IndirectReg(Gpr),
    IndirectMem(MemOperand),
}

impl Operand {
    /// A bare symbol in a data position is an absolute memory reference.
    fn into_data(self) -> Result<Self> {
        match self {
            Self::Label(name) => Ok(Self::Mem(absolute(Displacement::symbol(name, 0))?)),
            other => Ok(other),
        }
    }
}

/// Instructions with a width-suffixed mnemonic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DataOp {
    Mov,
    Not,
    Alu(AluOp),
}

impl DataOp {
    fn from_base(base: &str) -> Option<Self> {
        match base {
            "mov" => Some(Self::Mov),
            "not" => Some(Self::Not),
            other => AluOp::from_mnemonic(other).map(Self::Alu),
        }
    }
}

impl FromStr for Inst {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        parse_inst(s)
    }
}

/// Parse a single AT&T instruction.
///
/// # Errors
///
/// Returns a `ParseError` describing the first problem found.
pub fn parse_inst(text: &str) -> Result<Inst> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    let (mnemonic, rest) = text
        .split_once(char::is_whitespace)
        .map_or((text, ""), |(m, r)| (m, r.trim()));
    let mnemonic = mnemonic.to_ascii_lowercase();
    let operands = split_operands(rest)
        .into_iter()
        .map(parse_operand)
        .collect::<Result<Vec<_>>>()?;

    match mnemonic.as_str() {
        "lfence" => nullary(&mnemonic, &operands, Inst::Lfence),
        "nop" => nullary(&mnemonic, &operands, Inst::Nop),
        "ret" | "retq" => nullary(&mnemonic, &operands, Inst::Ret),
        "push" | "pushq" => {
            match single(&mnemonic, operands)?.into_data()? {
                Operand::Reg(reg, Width::Q) => Ok(Inst::Push(reg)),
                Operand::Mem(mem) => Ok(Inst::PushMem(mem)),
                Operand::Reg(..) => Err(ParseError::WidthMismatch(mnemonic.clone())),
                _ => Err(ParseError::InvalidOperand(text.to_string())),
            }
        }
        "pop" | "popq" => match single(&mnemonic, operands)? {
            Operand::Reg(reg, Width::Q) => Ok(Inst::Pop(reg)),
            Operand::Reg(..) => Err(ParseError::WidthMismatch(mnemonic.clone())),
            _ => Err(ParseError::InvalidOperand(text.to_string())),
        },
        "lea" | "leaq" => {
            let [src, dst] = pair(&mnemonic, operands)?;
            match (src.into_data()?, dst) {
                (Operand::Mem(src), Operand::Reg(dst, Width::Q)) => Ok(Inst::Lea { src, dst }),
                (Operand::Mem(_), Operand::Reg(..)) => Err(ParseError::WidthMismatch(mnemonic.clone())),
                _ => Err(ParseError::InvalidOperand(text.to_string())),
            }
        }
        "movabs" | "movabsq" => {
            let [src, dst] = pair(&mnemonic, operands)?;
            match (src, dst) {
                (Operand::Imm(imm), Operand::Reg(dst, Width::Q)) => Ok(Inst::MovAbs { imm, dst }),
                _ => Err(ParseError::InvalidOperand(text.to_string())),
            }
        }
        "jmp" | "jmpq" => transfer(&mnemonic, operands).map(Inst::Jmp),
        "call" | "callq" => transfer(&mnemonic, operands).map(Inst::Call),
        m => {
            if let Some(cond) = m.strip_prefix('j').and_then(CondCode::from_suffix) {
                return match single(&mnemonic, operands)? {
                    Operand::Label(target) => Ok(Inst::Jcc { cond, target }),
                    _ => Err(ParseError::InvalidOperand(text.to_string())),
                };
            }
            let (op, suffix) =
                data_mnemonic(m).ok_or_else(|| ParseError::UnknownMnemonic(mnemonic.clone()))?;
            let operands = operands
                .into_iter()
                .map(Operand::into_data)
                .collect::<Result<Vec<_>>>()?;
            let width = resolve_width(&mnemonic, suffix, &operands)?;
            data_inst(&mnemonic, op, width, operands, text)
        }
    }
}

fn nullary(mnemonic: &str, operands: &[Operand], inst: Inst) -> Result<Inst> {
    if operands.is_empty() {
        Ok(inst)
    } else {
        Err(count_error(mnemonic, 0, operands.len()))
    }
}

fn single(mnemonic: &str, operands: Vec<Operand>) -> Result<Operand> {
    let actual = operands.len();
    let [op]: [Operand; 1] = operands
        .try_into()
        .map_err(|_| count_error(mnemonic, 1, actual))?;
    Ok(op)
}

fn pair(mnemonic: &str, operands: Vec<Operand>) -> Result<[Operand; 2]> {
    let actual = operands.len();
    operands
        .try_into()
        .map_err(|_| count_error(mnemonic, 2, actual))
}

fn count_error(mnemonic: &str, expected: usize, actual: usize) -> ParseError {
    ParseError::OperandCount {
        mnemonic: mnemonic.to_string(),
        expected,
        actual,
    }
}

fn transfer(mnemonic: &str, operands: Vec<Operand>) -> Result<JumpTarget> {
    match single(mnemonic, operands)? {
        Operand::Label(label) => Ok(JumpTarget::Direct(label)),
        Operand::IndirectReg(reg) => Ok(JumpTarget::Reg(reg)),
        Operand::IndirectMem(mem) => Ok(JumpTarget::Mem(mem)),
        other => Err(ParseError::InvalidOperand(format!("{mnemonic} {other:?}"))),
    }
}

/// Split a mnemonic into its base operation and optional width suffix.
fn data_mnemonic(m: &str) -> Option<(DataOp, Option<Width>)> {
    if let Some(op) = DataOp::from_base(m) {
        return Some((op, None));
    }
    let mut chars = m.chars();
    let width = Width::from_suffix(chars.next_back()?)?;
    DataOp::from_base(chars.as_str()).map(|op| (op, Some(width)))
}

/// Operand width from the suffix and register operands, which must agree.
fn resolve_width(mnemonic: &str, suffix: Option<Width>, operands: &[Operand]) -> Result<Width> {
    let mut width = suffix;
    for op in operands {
        if let Operand::Reg(_, w) = op {
            match width {
                None => width = Some(*w),
                Some(existing) if existing != *w => {
                    return Err(ParseError::WidthMismatch(mnemonic.to_string()));
                }
                Some(_) => {}
            }
        }
    }
    width.ok_or_else(|| ParseError::AmbiguousWidth(mnemonic.to_string()))
}

fn data_inst(
    mnemonic: &str,
    op: DataOp,
    width: Width,
    operands: Vec<Operand>,
    text: &str,
) -> Result<Inst> {
    if op == DataOp::Not {
        let dst = match single(mnemonic, operands)? {
            Operand::Reg(reg, _) => RegOrMem::Reg(reg),
            Operand::Mem(mem) => RegOrMem::Mem(mem),
            _ => return Err(ParseError::InvalidOperand(text.to_string())),
        };
        return Ok(Inst::Not { width, dst });
    }

    let [src, dst] = pair(mnemonic, operands)?;
    if let (DataOp::Mov, Operand::Imm(imm), Operand::Reg(dst, Width::Q)) = (op, &src, &dst) {
        if i32::try_from(*imm).is_err() {
            return Ok(Inst::MovAbs {
                imm: *imm,
                dst: *dst,
            });
        }
    }

    let form = match (src, dst) {
        (Operand::Reg(src, _), Operand::Reg(dst, _)) => DataForm::RegReg { src, dst },
        (Operand::Mem(src), Operand::Reg(dst, _)) => DataForm::MemReg { src, dst },
        (Operand::Reg(src, _), Operand::Mem(dst)) => DataForm::RegMem { src, dst },
        (Operand::Imm(imm), Operand::Reg(dst, _)) => DataForm::ImmReg {
            imm: imm32(width, imm)?,
            dst,
        },
        (Operand::Imm(imm), Operand::Mem(dst)) => DataForm::ImmMem {
            imm: imm32(width, imm)?,
            dst,
        },
        _ => return Err(ParseError::InvalidOperand(text.to_string())),
    };
    Ok(match op {
        DataOp::Mov => Inst::Mov { width, form },
        DataOp::Alu(op) => Inst::Alu { op, width, form },
        DataOp::Not => unreachable!("not is handled above"),
    })
}

/// Immediate as encoded: sign-extended imm32, or a full unsigned 32-bit
/// pattern for 32-bit operations.
fn imm32(width: Width, imm: i64) -> Result<i32> {
    i32::try_from(imm)
        .ok()
        .or_else(|| {
            (width == Width::D)
                .then(|| u32::try_from(imm).ok())
                .flatten()
                .map(|v| i32::from_ne_bytes(v.to_ne_bytes()))
        })
        .ok_or_else(|| ParseError::InvalidImmediate(imm.to_string()))
}

/// Split on top-level commas (commas inside parentheses belong to memory
/// operands).
fn split_operands(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut depth = 0u32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts
}

fn parse_operand(text: &str) -> Result<Operand> {
    if let Some(imm) = text.strip_prefix('$') {
        return parse_int(imm)
            .map(Operand::Imm)
            .ok_or_else(|| ParseError::InvalidImmediate(text.to_string()));
    }
    if let Some(target) = text.strip_prefix('*') {
        return match parse_operand(target.trim())? {
            Operand::Reg(reg, Width::Q) => Ok(Operand::IndirectReg(reg)),
            Operand::Mem(mem) => Ok(Operand::IndirectMem(mem)),
            Operand::Label(name) => Ok(Operand::IndirectMem(absolute(Displacement::symbol(
                name, 0,
            ))?)),
            _ => Err(ParseError::InvalidOperand(text.to_string())),
        };
    }
    if let Some(name) = text.strip_prefix('%') {
        if !name.contains(':') {
            return Gpr::parse(name)
                .map(|(reg, width)| Operand::Reg(reg, width))
                .ok_or_else(|| ParseError::UnknownRegister(text.to_string()));
        }
    } else if symbol_pattern()
        .captures(text)
        .is_some_and(|caps| caps.get(2).is_none())
    {
        return Ok(Operand::Label(text.to_string()));
    }
    parse_mem(text).map(Operand::Mem)
}

fn parse_mem(text: &str) -> Result<MemOperand> {
    let invalid = || ParseError::InvalidOperand(text.to_string());
    let caps = mem_pattern().captures(text).ok_or_else(invalid)?;

    let segment = caps
        .get(1)
        .map(|m| {
            SegmentReg::parse(m.as_str())
                .ok_or_else(|| ParseError::UnknownRegister(format!("%{}", m.as_str())))
        })
        .transpose()?;
    let disp_text = caps.get(2).map_or("", |m| m.as_str().trim());
    let has_parens = text.trim_end().ends_with(')');
    if disp_text.is_empty() && !has_parens {
        return Err(invalid());
    }
    let disp = parse_displacement(disp_text).ok_or_else(invalid)??;

    let base = caps
        .get(3)
        .map(|m| match m.as_str() {
            "rip" => Ok(Base::Rip),
            name => parse_reg64(name).map(Base::Gpr),
        })
        .transpose()?;
    let index = caps.get(4).map(|m| parse_reg64(m.as_str())).transpose()?;
    let scale = caps
        .get(5)
        .map(|m| {
            m.as_str()
                .parse::<u8>()
                .map_err(|_| OperandError::InvalidScale(0))
                .and_then(Scale::from_value)
        })
        .transpose()?
        .unwrap_or_default();

    Ok(MemOperand::new(base, index, scale, disp, segment)?)
}

/// Address registers are always 64-bit.
fn parse_reg64(name: &str) -> Result<Gpr> {
    match Gpr::parse(name) {
        Some((reg, Width::Q)) => Ok(reg),
        _ => Err(ParseError::UnknownRegister(format!("%{name}"))),
    }
}

/// Returns `None` for text that is neither a number nor a symbol.
fn parse_displacement(text: &str) -> Option<Result<Displacement>> {
    if text.is_empty() {
        return Some(Ok(Displacement::Imm(0)));
    }
    if let Some(value) = parse_int(text) {
        return Some(disp32(value).map(Displacement::Imm));
    }
    let caps = symbol_pattern().captures(text)?;
    let name = caps.get(1)?.as_str();
    let addend = match (caps.get(2), caps.get(3)) {
        (Some(sign), Some(value)) => {
            let value = parse_int(value.as_str())?;
            if sign.as_str() == "-" { -value } else { value }
        }
        _ => 0,
    };
    Some(disp32(addend).map(|addend| Displacement::symbol(name, addend)))
}

fn disp32(value: i64) -> Result<i32> {
    i32::try_from(value).map_err(|_| OperandError::DisplacementOutOfRange(value).into())
}

/// Decimal or `0x` hex integer with optional sign.
fn parse_int(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let value = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        i64::from_str_radix(hex, 16).ok()?
    } else {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

fn absolute(disp: Displacement) -> Result<MemOperand> {
    Ok(MemOperand::new(None, None, Scale::X1, disp, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Inst {
        text.parse().unwrap_or_else(|e| panic!("{text}: {e}"))
    }

    #[test]
    fn test_nullary() {
        assert_eq!(parse("lfence"), Inst::Lfence);
        assert_eq!(parse("  retq "), Inst::Ret);
        assert_eq!(parse("ret"), Inst::Ret);
        assert_eq!(parse("nop"), Inst::Nop);
    }

    #[test]
    fn test_moves_and_suffixes() {
        assert_eq!(
            parse("movq 0x8(%rbx), %rdi"),
            Inst::load(Width::Q, MemOperand::base_disp(Gpr::Rbx, 8), Gpr::Rdi)
        );
        assert_eq!(
            parse("mov %eax, (%rsp)"),
            Inst::store(Width::D, Gpr::Rax, MemOperand::base(Gpr::Rsp))
        );
        assert_eq!(
            parse("movl $0xffffffff, %eax"),
            Inst::Mov {
                width: Width::D,
                form: DataForm::ImmReg { imm: -1, dst: Gpr::Rax }
            }
        );
        assert_eq!(
            parse("movq $0x123456789, %rax"),
            Inst::MovAbs {
                imm: 0x1_2345_6789,
                dst: Gpr::Rax
            }
        );
        // "sub" ends in a suffix letter but is a base mnemonic.
        assert_eq!(
            parse("sub $8, %rsp"),
            Inst::alu(AluOp::Sub, Width::Q, DataForm::ImmReg { imm: 8, dst: Gpr::Rsp })
        );
    }

    #[test]
    fn test_memory_forms() {
        let inst = parse("jmpq *%fs:0x10(%rax,%rcx,8)");
        let Inst::Jmp(JumpTarget::Mem(mem)) = inst else {
            panic!("expected memory jump");
        };
        assert_eq!(mem.segment(), Some(SegmentReg::Fs));
        assert_eq!(mem.base_reg(), Some(Base::Gpr(Gpr::Rax)));
        assert_eq!(mem.index(), Some(Gpr::Rcx));
        assert_eq!(mem.scale(), Scale::X8);
        assert_eq!(mem.disp(), &Displacement::Imm(0x10));

        let inst = parse("callq *fptr+0x8(%rip)");
        assert_eq!(
            inst,
            Inst::call_mem(MemOperand::rip(Displacement::symbol("fptr", 8)))
        );

        let inst = parse("jmp *(,%rdi,4)");
        let Inst::Jmp(JumpTarget::Mem(mem)) = inst else {
            panic!("expected memory jump");
        };
        assert_eq!(mem.base_reg(), None);
        assert_eq!(mem.index(), Some(Gpr::Rdi));
    }

    #[test]
    fn test_transfers() {
        assert_eq!(parse("jne .LBB0_2"), Inst::jcc(CondCode::Ne, ".LBB0_2"));
        assert_eq!(parse("jz done"), Inst::jcc(CondCode::E, "done"));
        assert_eq!(parse("callq memcpy@PLT"), Inst::call("memcpy@PLT"));
        assert_eq!(parse("jmp .L3"), Inst::jmp(".L3"));
        assert_eq!(parse("call *%rax"), Inst::Call(JumpTarget::Reg(Gpr::Rax)));
        assert_eq!(
            parse("pushq (%rsi)"),
            Inst::PushMem(MemOperand::base(Gpr::Rsi))
        );
    }

    #[test]
    fn test_display_round_trip() {
        for text in [
            "leaq 0x15(%rip), %rdi",
            "movq %rdi, 0x8(%rsp)",
            "notq (%rsp)",
            "addq $-0x8, %rsp",
            "cmpb $0x1, -0x10(%rbp)",
            "testl %esi, %esi",
            "xorl %eax, %eax",
            "movabsq $0x1122334455667788, %r10",
            "pushq %r12",
            "popq %rdi",
            "callq *(%rsi)",
            "movq %gs:0x28, %rax",
        ] {
            assert_eq!(parse(text).to_string(), text);
        }
    }

    #[test]
    fn test_errors() {
        assert_eq!("".parse::<Inst>(), Err(ParseError::Empty));
        assert!(matches!(
            "frobq %rax".parse::<Inst>(),
            Err(ParseError::UnknownMnemonic(_))
        ));
        assert!(matches!(
            "movq %rax, %ebx".parse::<Inst>(),
            Err(ParseError::WidthMismatch(_))
        ));
        assert!(matches!(
            "mov $1, (%rax)".parse::<Inst>(),
            Err(ParseError::AmbiguousWidth(_))
        ));
        assert!(matches!(
            "movq (%rax,%rsp,1), %rbx".parse::<Inst>(),
            Err(ParseError::Operand(OperandError::InvalidIndex(Gpr::Rsp)))
        ));
        assert!(matches!(
            "movq (%rax,%rbx,3), %rbx".parse::<Inst>(),
            Err(ParseError::Operand(OperandError::InvalidScale(3)))
        ));
        assert!(matches!(
            "movq %rax, %xyz".parse::<Inst>(),
            Err(ParseError::UnknownRegister(_))
        ));
        assert!(matches!(
            "retq %rax".parse::<Inst>(),
            Err(ParseError::OperandCount { expected: 0, .. })
        ));
    }
}
