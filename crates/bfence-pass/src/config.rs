//! Pass configuration.

use rustc_hash::FxHashSet;

/// How functions are distributed over threads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Parallelism {
    /// One thread, one encoder for the whole run.
    #[default]
    Serial,
    /// One worker per available CPU.
    Auto,
    /// Fixed number of workers.
    Threads(usize),
}

impl Parallelism {
    /// From a `--jobs` style count: 0 = auto, 1 = serial.
    #[must_use]
    pub const fn from_jobs(jobs: usize) -> Self {
        match jobs {
            0 => Self::Auto,
            1 => Self::Serial,
            n => Self::Threads(n),
        }
    }

    /// Effective worker count (at least 1).
    #[must_use]
    pub fn threads(self) -> usize {
        match self {
            Self::Serial => 1,
            Self::Auto => num_cpus::get().max(1),
            Self::Threads(n) => n.max(1),
        }
    }
}

/// Function selection by name.
///
/// A function is processed unless it is in `skip`; when `only` is set it must
/// also be listed there.
#[derive(Clone, Debug, Default)]
pub struct FunctionFilter {
    skip: FxHashSet<String>,
    only: Option<FxHashSet<String>>,
}

impl FunctionFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Never process these functions.
    #[must_use]
    pub fn with_skip<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.skip.extend(names.into_iter().map(Into::into));
        self
    }

    /// Process only these functions.
    #[must_use]
    pub fn with_only<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.only
            .get_or_insert_with(FxHashSet::default)
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Check if the function named `name` should be processed.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        !self.skip.contains(name) && self.only.as_ref().is_none_or(|only| only.contains(name))
    }
}

/// Lfence insertion configuration.
///
/// The pass does nothing unless `enabled`; each rule can be switched off
/// individually.
#[derive(Clone, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct LfenceConfig {
    /// Master switch.
    pub enabled: bool,
    /// Fence before conditional branches.
    pub conditional_branches: bool,
    /// Fence after loads.
    pub loads: bool,
    /// Fence the return slot before returns.
    pub returns: bool,
    /// Rewrite calls through memory.
    pub indirect_calls: bool,
    /// Rewrite jumps through memory.
    pub indirect_jumps: bool,
    pub parallelism: Parallelism,
    pub filter: FunctionFilter,
}

impl Default for LfenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            conditional_branches: true,
            loads: true,
            returns: true,
            indirect_calls: true,
            indirect_jumps: true,
            parallelism: Parallelism::Serial,
            filter: FunctionFilter::default(),
        }
    }
}

impl LfenceConfig {
    /// Enabled configuration with every rule on.
    #[must_use]
    pub fn active() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Set the master switch.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub const fn with_conditional_branches(mut self, on: bool) -> Self {
        self.conditional_branches = on;
        self
    }

    #[must_use]
    pub const fn with_loads(mut self, on: bool) -> Self {
        self.loads = on;
        self
    }

    #[must_use]
    pub const fn with_returns(mut self, on: bool) -> Self {
        self.returns = on;
        self
    }

    #[must_use]
    pub const fn with_indirect_calls(mut self, on: bool) -> Self {
        self.indirect_calls = on;
        self
    }

    #[must_use]
    pub const fn with_indirect_jumps(mut self, on: bool) -> Self {
        self.indirect_jumps = on;
        self
    }

    /// Set thread distribution.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set function selection.
    #[must_use]
    pub fn with_filter(mut self, filter: FunctionFilter) -> Self {
        self.filter = filter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LfenceConfig::default();
        assert!(!config.enabled);
        assert!(config.conditional_branches);
        assert!(config.loads);
        assert!(config.returns);
        assert!(config.indirect_calls);
        assert!(config.indirect_jumps);
        assert_eq!(config.parallelism, Parallelism::Serial);
        assert!(LfenceConfig::active().enabled);
    }

    #[test]
    fn test_jobs() {
        assert_eq!(Parallelism::from_jobs(0), Parallelism::Auto);
        assert_eq!(Parallelism::from_jobs(1), Parallelism::Serial);
        assert_eq!(Parallelism::from_jobs(4), Parallelism::Threads(4));
        assert_eq!(Parallelism::Threads(0).threads(), 1);
        assert!(Parallelism::Auto.threads() >= 1);
    }

    #[test]
    fn test_filter() {
        let filter = FunctionFilter::new().with_skip(["hot_loop"]);
        assert!(filter.allows("main"));
        assert!(!filter.allows("hot_loop"));

        let filter = FunctionFilter::new()
            .with_only(["parse", "hot_loop"])
            .with_skip(["hot_loop"]);
        assert!(filter.allows("parse"));
        assert!(!filter.allows("hot_loop"));
        assert!(!filter.allows("main"));
    }
}
