//! bfence - Spectre v1 hardening for x86-64 programs
//!
//! Reads a program listing, inserts `lfence` barriers after loads and
//! before conditional branches, hardens returns, and rewrites
//! memory-indirect calls and jumps into fenced `push; ret` sequences.
//!
//! # Example
//!
//! ```ignore
//! use bfence::{Hardener, LfenceConfig};
//!
//! let hardener = Hardener::new(LfenceConfig::active());
//! let stats = hardener.harden_file("in.s".as_ref(), Some("out.s".as_ref()))?;
//! println!("{stats}");
//! ```

pub mod listing;
pub mod metrics;

pub use bfence_ir::{BasicBlock, Function, IrError, Program, RelocationMode, TargetArch};
pub use bfence_pass::{
    FunctionFilter, LfenceConfig, LfenceInsertion, MitigationStats, Parallelism, PassError, Rule,
};
pub use bfence_x86::{Inst, ParseError};
pub use listing::{ListingError, parse_listing, render_listing};

use std::path::{Path, PathBuf};

use bfence_x86::X86Encoder;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

/// Hardening errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{}: {source}", .path.display())]
    Listing {
        path: PathBuf,
        source: ListingError,
    },
    #[error("Pass failed: {0}")]
    Pass(#[from] PassError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Encoded size of one function before and after hardening.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionSize {
    pub name: String,
    pub before: u64,
    pub after: u64,
}

impl FunctionSize {
    /// Bytes added by hardening.
    #[must_use]
    pub const fn growth(&self) -> u64 {
        self.after.saturating_sub(self.before)
    }
}

/// Read a listing file.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read and `Error::Listing`
/// if it does not parse.
pub fn read_listing(path: &Path) -> Result<Program<Inst>> {
    let text = std::fs::read_to_string(path)?;
    parse_listing(&text).map_err(|source| Error::Listing {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a program as a listing file.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be written.
pub fn write_listing(path: &Path, program: &Program<Inst>) -> Result<()> {
    std::fs::write(path, render_listing(program))?;
    Ok(())
}

/// Encoded size of every function, in program order.
#[must_use]
pub fn code_sizes(program: &Program<Inst>) -> Vec<(String, u64)> {
    program
        .functions()
        .par_iter()
        .map_init(X86Encoder::new, |encoder, function| {
            let bytes = encoder.encode_all(function.instructions()).len() as u64;
            (function.name().to_string(), bytes)
        })
        .collect()
}

/// Lfence insertion with metrics recording and listing I/O.
#[derive(Clone, Debug, Default)]
pub struct Hardener {
    pass: LfenceInsertion,
}

impl Hardener {
    #[must_use]
    pub const fn new(config: LfenceConfig) -> Self {
        Self {
            pass: LfenceInsertion::new(config),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &LfenceConfig {
        self.pass.config()
    }

    /// Harden `program` in place and record the counts as metrics.
    ///
    /// # Errors
    ///
    /// Returns `Error::Pass` if the program's target or relocation mode
    /// rules the pass out; the program is left untouched in that case.
    pub fn harden(&self, program: &mut Program<Inst>) -> Result<MitigationStats> {
        let stats = self.pass.run(program)?;
        crate::metrics::record_mitigations(&stats);
        Ok(stats)
    }

    /// Count the sites each rule would touch without rewriting anything.
    #[must_use]
    pub fn survey(&self, program: &Program<Inst>) -> MitigationStats {
        self.pass.survey(program)
    }

    /// Harden a program and report per-function code growth.
    ///
    /// # Errors
    ///
    /// See [`Hardener::harden`].
    pub fn measure(&self, program: &mut Program<Inst>) -> Result<Vec<FunctionSize>> {
        let before = code_sizes(program);
        self.harden(program)?;
        let after = code_sizes(program);

        let sizes: Vec<_> = before
            .into_iter()
            .zip(after)
            .map(|((name, before), (_, after))| FunctionSize {
                name,
                before,
                after,
            })
            .collect();

        let total_before: u64 = sizes.iter().map(|s| s.before).sum();
        let total_after: u64 = sizes.iter().map(|s| s.after).sum();
        crate::metrics::record_code_growth(total_before, total_after);
        debug!(total_before, total_after, "measured code size");
        Ok(sizes)
    }

    /// Harden a listing file.
    ///
    /// Writes the hardened listing to `output`, or returns it in the
    /// second tuple field when `output` is `None`.
    ///
    /// # Errors
    ///
    /// Returns listing, pass and I/O errors.
    pub fn harden_file(
        &self,
        input: &Path,
        output: Option<&Path>,
    ) -> Result<(MitigationStats, Option<String>)> {
        let mut program = read_listing(input)?;
        info!(
            input = %input.display(),
            functions = program.len(),
            instructions = program.instruction_count(),
            "read listing"
        );
        let stats = self.harden(&mut program)?;
        match output {
            Some(path) => {
                write_listing(path, &program)?;
                info!(output = %path.display(), "wrote hardened listing");
                Ok((stats, None))
            }
            None => Ok((stats, Some(render_listing(&program)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
func get
    movq (%rdi), %rax
    retq

func call_through
    callq *0x10(%rdi)
    retq
";

    #[test]
    fn test_code_sizes() {
        let program = parse_listing(LISTING).unwrap();
        let sizes = code_sizes(&program);
        // movq (%rdi),%rax = 3 bytes, retq = 1; callq *0x10(%rdi) = 3.
        assert_eq!(
            sizes,
            [("get".to_string(), 4), ("call_through".to_string(), 4)]
        );
    }

    #[test]
    fn test_measure_reports_growth() {
        let mut program = parse_listing(LISTING).unwrap();
        let sizes = Hardener::new(LfenceConfig::active())
            .measure(&mut program)
            .unwrap();
        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|s| s.after > s.before));
        // Load fence (3) plus the return sequence: two 4-byte nots and a fence.
        assert_eq!(sizes[0].growth(), 3 + 4 + 4 + 3);
    }

    #[test]
    fn test_disabled_hardener_changes_nothing() {
        let mut program = parse_listing(LISTING).unwrap();
        let before = program.clone();
        let sizes = Hardener::default().measure(&mut program).unwrap();
        assert_eq!(program, before);
        assert!(sizes.iter().all(|s| s.growth() == 0));
    }

    #[test]
    fn test_listing_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.s");
        std::fs::write(&path, "func f\n    frob %rax\n").unwrap();

        let err = read_listing(&path).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with(&path.display().to_string()));
        assert!(message.contains("line 2"));
    }
}
