//! Text listing reader and writer.
//!
//! A listing is a line-oriented description of a program:
//!
//! ```text
//! # comment
//! target x86_64
//! relocs on
//!
//! func lookup
//! lookup:
//!     movq 0x8(%rdi), %rax
//!     cmpq %rsi, %rax
//!     jae .Lout
//! .Lout:
//!     retq
//! ```
//!
//! `func <name> ignored` marks a function the pass must leave alone. An
//! instruction that appears before the first label of a function opens a
//! block named after the function.

use std::fmt::Write as _;

use bfence_ir::{BasicBlock, Function, IrError, Program, RelocationMode, TargetArch};
use bfence_x86::{Inst, ParseError};
use thiserror::Error;

/// Listing errors, tagged with the 1-based line they occur on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListingError {
    #[error("line {line}: {source}")]
    Instruction { line: usize, source: ParseError },
    #[error("line {line}: {source}")]
    Program { line: usize, source: IrError },
    #[error("line {line}: {directive} expects {expected}")]
    Directive {
        line: usize,
        directive: &'static str,
        expected: &'static str,
    },
    #[error("line {line}: {what} outside of a function")]
    OutsideFunction { line: usize, what: &'static str },
}

impl ListingError {
    /// Line the error was reported on.
    #[must_use]
    pub const fn line(&self) -> usize {
        match self {
            Self::Instruction { line, .. }
            | Self::Program { line, .. }
            | Self::Directive { line, .. }
            | Self::OutsideFunction { line, .. } => *line,
        }
    }
}

type Result<T> = std::result::Result<T, ListingError>;

/// Function being read, with the line its `func` directive was on.
struct PendingFunction {
    line: usize,
    function: Function<Inst>,
}

/// Parse a listing into a program.
///
/// # Errors
///
/// Returns the first malformed line: unknown directive arguments, labels
/// or instructions outside a function, unparsable instructions and
/// duplicate function names.
pub fn parse_listing(text: &str) -> Result<Program<Inst>> {
    let mut program = Program::new(TargetArch::default(), RelocationMode::default());
    let mut current: Option<PendingFunction> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split_once('#').map_or(raw, |(code, _)| code).trim();
        if content.is_empty() {
            continue;
        }

        if let Some(label) = as_label(content) {
            let pending = current.as_mut().ok_or(ListingError::OutsideFunction {
                line,
                what: "label",
            })?;
            pending.function.push_block(BasicBlock::new(label));
            continue;
        }

        let (word, rest) = content
            .split_once(char::is_whitespace)
            .map_or((content, ""), |(w, r)| (w, r.trim()));

        match word {
            "target" => {
                let target = rest
                    .parse::<TargetArch>()
                    .map_err(|source| ListingError::Program { line, source })?;
                program.set_target(target);
            }
            "relocs" => {
                let mode = rest
                    .parse::<RelocationMode>()
                    .map_err(|source| ListingError::Program { line, source })?;
                program.set_relocation_mode(mode);
            }
            "func" => {
                let mut args = rest.split_whitespace();
                let (Some(name), flag, None) = (args.next(), args.next(), args.next()) else {
                    return Err(ListingError::Directive {
                        line,
                        directive: "func",
                        expected: "a name and an optional `ignored` flag",
                    });
                };
                let ignored = match flag {
                    None => false,
                    Some("ignored") => true,
                    Some(_) => {
                        return Err(ListingError::Directive {
                            line,
                            directive: "func",
                            expected: "`ignored` as the only flag",
                        });
                    }
                };
                finish_function(&mut program, current.take())?;
                current = Some(PendingFunction {
                    line,
                    function: Function::new(name).with_ignored(ignored),
                });
            }
            _ => {
                let pending = current.as_mut().ok_or(ListingError::OutsideFunction {
                    line,
                    what: "instruction",
                })?;
                let inst = content
                    .parse::<Inst>()
                    .map_err(|source| ListingError::Instruction { line, source })?;
                let function = &mut pending.function;
                if function.blocks().is_empty() {
                    let entry = BasicBlock::new(function.name());
                    function.push_block(entry);
                }
                if let Some(block) = function.last_block_mut() {
                    block.push(inst);
                }
            }
        }
    }

    finish_function(&mut program, current)?;
    Ok(program)
}

fn finish_function(program: &mut Program<Inst>, pending: Option<PendingFunction>) -> Result<()> {
    if let Some(PendingFunction { line, function }) = pending {
        program
            .add_function(function)
            .map_err(|source| ListingError::Program { line, source })?;
    }
    Ok(())
}

/// A label is a single token ending in `:`.
fn as_label(content: &str) -> Option<&str> {
    content
        .strip_suffix(':')
        .filter(|label| !label.is_empty() && !label.contains(char::is_whitespace))
}

/// Render a program in listing form.
///
/// The output parses back to an equal program.
#[must_use]
pub fn render_listing(program: &Program<Inst>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "target {}", program.target());
    let _ = writeln!(out, "relocs {}", program.relocation_mode());

    for function in program.functions() {
        out.push('\n');
        if function.is_ignored() {
            let _ = writeln!(out, "func {} ignored", function.name());
        } else {
            let _ = writeln!(out, "func {}", function.name());
        }
        for block in function.blocks() {
            let _ = writeln!(out, "{}:", block.label());
            for inst in block.iter() {
                let _ = writeln!(out, "    {inst}");
            }
        }
    }
    out
}
