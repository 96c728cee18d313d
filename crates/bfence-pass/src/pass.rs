//! Pass driver.

use bfence_ir::{Function, Program};
use bfence_x86::{Inst, X86Encoder};
use rayon::prelude::*;
use tracing::{debug, trace_span};

use crate::config::LfenceConfig;
use crate::rewrite::{Rule, harden_function, select_rule};
use crate::stats::MitigationStats;
use crate::{PassError, Result};

/// Lfence insertion over a whole program.
#[derive(Clone, Debug, Default)]
pub struct LfenceInsertion {
    config: LfenceConfig,
}

impl LfenceInsertion {
    #[must_use]
    pub const fn new(config: LfenceConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &LfenceConfig {
        &self.config
    }

    /// Pass name, for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        "lfence-insertion"
    }

    /// Run the pass, mutating `program` in place.
    ///
    /// Does nothing and reports zero counts unless the configuration is
    /// enabled.
    ///
    /// # Errors
    ///
    /// Returns `PassError::UnsupportedTarget` for non-x86-64 programs and
    /// `PassError::RelocationsRequired` when relocations are not preserved.
    /// Both are detected before anything is modified.
    pub fn run(&self, program: &mut Program<Inst>) -> Result<MitigationStats> {
        if !self.config.enabled {
            debug!(pass = self.name(), "pass disabled");
            return Ok(MitigationStats::default());
        }
        self.check_preconditions(program)?;

        let threads = self.config.parallelism.threads();
        let stats = if threads > 1 {
            self.run_parallel(program, threads)?
        } else {
            self.run_serial(program)
        };
        stats.log_summary();
        Ok(stats)
    }

    /// Count the sites each rule would touch, without modifying anything.
    ///
    /// Honours the rule switches and function selection but not the master
    /// switch or target checks.
    #[must_use]
    pub fn survey(&self, program: &Program<Inst>) -> MitigationStats {
        let mut stats = MitigationStats::default();
        for function in program.functions().iter().filter(|f| self.is_eligible(f)) {
            for rule in function
                .instructions()
                .filter_map(|inst| select_rule(inst, &self.config))
            {
                stats.record(rule);
            }
        }
        stats
    }

    /// Check the target and relocation mode.
    ///
    /// # Errors
    ///
    /// See [`LfenceInsertion::run`].
    pub fn check_preconditions(&self, program: &Program<Inst>) -> Result<()> {
        if !program.target().is_x86() {
            return Err(PassError::UnsupportedTarget(program.target()));
        }
        if !program.has_relocations() {
            return Err(PassError::RelocationsRequired);
        }
        Ok(())
    }

    /// Check if `function` should be processed.
    #[must_use]
    pub fn is_eligible(&self, function: &Function<Inst>) -> bool {
        !function.is_ignored() && self.config.filter.allows(function.name())
    }

    fn run_serial(&self, program: &mut Program<Inst>) -> MitigationStats {
        let mut encoder = X86Encoder::new();
        program
            .functions_mut()
            .iter_mut()
            .map(|function| self.harden(function, &mut encoder))
            .sum()
    }

    fn run_parallel(&self, program: &mut Program<Inst>, threads: usize) -> Result<MitigationStats> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?;
        debug!(threads, "hardening functions in parallel");
        Ok(pool.install(|| {
            program
                .functions_mut()
                .par_iter_mut()
                .map_init(X86Encoder::new, |encoder, function| {
                    self.harden(function, encoder)
                })
                .reduce(MitigationStats::default, |a, b| a + b)
        }))
    }

    fn harden(&self, function: &mut Function<Inst>, encoder: &mut X86Encoder) -> MitigationStats {
        if !self.is_eligible(function) {
            debug!(function = function.name(), "skipping function");
            return MitigationStats::default();
        }
        let _span = trace_span!("harden_function", function = function.name()).entered();
        let stats = harden_function(function, &self.config, encoder);
        debug!(
            function = function.name(),
            branches = stats.get(Rule::ConditionalBranch),
            loads = stats.get(Rule::Load),
            returns = stats.get(Rule::Return),
            indirect_calls = stats.get(Rule::IndirectCall),
            indirect_jumps = stats.get(Rule::IndirectJump),
            "function hardened"
        );
        stats
    }
}
