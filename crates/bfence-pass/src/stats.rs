//! Mitigation counters and summary report.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use tracing::info;

use crate::rewrite::Rule;

/// Number of sites mitigated per rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MitigationStats {
    pub branches: u64,
    pub loads: u64,
    pub returns: u64,
    pub indirect_calls: u64,
    pub indirect_jumps: u64,
}

impl MitigationStats {
    /// Count one site for `rule`.
    pub const fn record(&mut self, rule: Rule) {
        *self.counter_mut(rule) += 1;
    }

    /// Get the count for `rule`.
    #[must_use]
    pub const fn get(&self, rule: Rule) -> u64 {
        match rule {
            Rule::ConditionalBranch => self.branches,
            Rule::Load => self.loads,
            Rule::Return => self.returns,
            Rule::IndirectCall => self.indirect_calls,
            Rule::IndirectJump => self.indirect_jumps,
        }
    }

    const fn counter_mut(&mut self, rule: Rule) -> &mut u64 {
        match rule {
            Rule::ConditionalBranch => &mut self.branches,
            Rule::Load => &mut self.loads,
            Rule::Return => &mut self.returns,
            Rule::IndirectCall => &mut self.indirect_calls,
            Rule::IndirectJump => &mut self.indirect_jumps,
        }
    }

    /// Total sites across all rules.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.branches + self.loads + self.returns + self.indirect_calls + self.indirect_jumps
    }

    /// Check if nothing was mitigated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Log the summary at info level.
    pub fn log_summary(&self) {
        info!(
            branches = self.branches,
            loads = self.loads,
            returns = self.returns,
            indirect_calls = self.indirect_calls,
            indirect_jumps = self.indirect_jumps,
            "lfence insertion complete"
        );
    }
}

impl AddAssign for MitigationStats {
    fn add_assign(&mut self, rhs: Self) {
        self.branches += rhs.branches;
        self.loads += rhs.loads;
        self.returns += rhs.returns;
        self.indirect_calls += rhs.indirect_calls;
        self.indirect_jumps += rhs.indirect_jumps;
    }
}

impl Add for MitigationStats {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Sum for MitigationStats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl fmt::Display for MitigationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rule in Rule::ALL {
            writeln!(f, "lfenced {:<15} {:>8}", rule.label(), self.get(rule))?;
        }
        Ok(())
    }
}
