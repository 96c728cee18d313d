//! Hardening metrics using metrics-rs.
//!
//! Counters are recorded after each pass run; the CLI installs a
//! [`CliRecorder`] with `--metrics` and prints what was collected at exit.

use std::collections::HashMap;
use std::sync::Arc;

use bfence_pass::{MitigationStats, Rule};
use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter,
    describe_counter, describe_gauge, gauge,
};
use parking_lot::RwLock;

// ============================================================================
// Metric descriptions
// ============================================================================

/// Counter name for sites mitigated under `rule`.
#[must_use]
pub const fn counter_name(rule: Rule) -> &'static str {
    match rule {
        Rule::ConditionalBranch => "bfence_lfenced_branches_total",
        Rule::Load => "bfence_lfenced_loads_total",
        Rule::Return => "bfence_lfenced_returns_total",
        Rule::IndirectCall => "bfence_lfenced_indirect_calls_total",
        Rule::IndirectJump => "bfence_lfenced_indirect_jumps_total",
    }
}

/// Initialize metric descriptions.
///
/// Call this once at startup to register metric descriptions.
pub fn init() {
    describe_counter!(
        counter_name(Rule::ConditionalBranch),
        Unit::Count,
        "Conditional branches preceded by an lfence"
    );
    describe_counter!(
        counter_name(Rule::Load),
        Unit::Count,
        "Loads followed by an lfence"
    );
    describe_counter!(
        counter_name(Rule::Return),
        Unit::Count,
        "Returns hardened with a return-slot touch and lfence"
    );
    describe_counter!(
        counter_name(Rule::IndirectCall),
        Unit::Count,
        "Memory-indirect calls rewritten to a fenced push/ret sequence"
    );
    describe_counter!(
        counter_name(Rule::IndirectJump),
        Unit::Count,
        "Memory-indirect jumps rewritten to a fenced push/ret sequence"
    );
    describe_gauge!(
        "bfence_code_growth_ratio",
        Unit::Count,
        "Encoded size after hardening divided by size before"
    );
}

// ============================================================================
// Metric recording functions
// ============================================================================

/// Record the counts of one pass run.
pub fn record_mitigations(stats: &MitigationStats) {
    for rule in Rule::ALL {
        counter!(counter_name(rule)).increment(stats.get(rule));
    }
}

/// Record code growth for a whole program.
#[allow(clippy::cast_precision_loss)]
pub fn record_code_growth(before: u64, after: u64) {
    if before > 0 {
        gauge!("bfence_code_growth_ratio").set(after as f64 / before as f64);
    }
}

// ============================================================================
// CLI Recorder for terminal output
// ============================================================================

#[derive(Default)]
struct CounterStorage {
    values: RwLock<HashMap<String, u64>>,
}

#[derive(Default)]
struct GaugeStorage {
    values: RwLock<HashMap<String, f64>>,
}

struct CliCounter {
    key: String,
    storage: Arc<CounterStorage>,
}

impl metrics::CounterFn for CliCounter {
    fn increment(&self, value: u64) {
        *self.storage.values.write().entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        self.storage.values.write().insert(self.key.clone(), value);
    }
}

struct CliGauge {
    key: String,
    storage: Arc<GaugeStorage>,
}

impl metrics::GaugeFn for CliGauge {
    fn increment(&self, value: f64) {
        *self.storage.values.write().entry(self.key.clone()).or_insert(0.0) += value;
    }

    fn decrement(&self, value: f64) {
        *self.storage.values.write().entry(self.key.clone()).or_insert(0.0) -= value;
    }

    fn set(&self, value: f64) {
        self.storage.values.write().insert(self.key.clone(), value);
    }
}

/// Recorder that keeps counters and gauges in memory for a summary at exit.
///
/// Histograms are not used by the tool and are dropped.
#[derive(Default)]
pub struct CliRecorder {
    counters: Arc<CounterStorage>,
    gauges: Arc<GaugeStorage>,
}

impl CliRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install this recorder as the global metrics recorder.
    ///
    /// Returns `None` if another recorder is already installed.
    #[must_use]
    pub fn install(self) -> Option<CliRecorderHandle> {
        let handle = self.handle();
        metrics::set_global_recorder(self).ok()?;
        Some(handle)
    }

    fn handle(&self) -> CliRecorderHandle {
        CliRecorderHandle {
            counters: Arc::clone(&self.counters),
            gauges: Arc::clone(&self.gauges),
        }
    }
}

fn key_to_string(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CliCounter {
            key: key_to_string(key),
            storage: Arc::clone(&self.counters),
        }))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(CliGauge {
            key: key_to_string(key),
            storage: Arc::clone(&self.gauges),
        }))
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

/// Handle for reading metrics after the recorder is installed.
pub struct CliRecorderHandle {
    counters: Arc<CounterStorage>,
    gauges: Arc<GaugeStorage>,
}

impl CliRecorderHandle {
    /// Get a counter value by key.
    #[must_use]
    pub fn get_counter(&self, key: &str) -> Option<u64> {
        self.counters.values.read().get(key).copied()
    }

    /// Get a gauge value by key.
    #[must_use]
    pub fn get_gauge(&self, key: &str) -> Option<f64> {
        self.gauges.values.read().get(key).copied()
    }

    /// Print all collected metrics in a human-readable format.
    pub fn print_summary(&self) {
        let counters = self.counters.values.read();
        let gauges = self.gauges.values.read();

        if counters.is_empty() && gauges.is_empty() {
            println!("No metrics collected.");
            return;
        }

        println!();
        println!("## Metrics Summary");
        println!();

        if !counters.is_empty() {
            println!("### Counters");
            let mut entries: Vec<_> = counters.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            for (key, value) in entries {
                println!("  {key}: {value}");
            }
            println!();
        }

        if !gauges.is_empty() {
            println!("### Gauges");
            let mut entries: Vec<_> = gauges.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            for (key, value) in entries {
                println!("  {key}: {value:.4}");
            }
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::Label;

    #[test]
    fn test_key_to_string() {
        let key = Key::from_name("bfence_lfenced_loads_total");
        assert_eq!(key_to_string(&key), "bfence_lfenced_loads_total");

        let key = Key::from_parts(
            "bfence_lfenced_loads_total",
            vec![Label::new("function", "memcpy")],
        );
        assert_eq!(
            key_to_string(&key),
            "bfence_lfenced_loads_total{function=memcpy}"
        );
    }

    #[test]
    fn test_counter_names_are_distinct() {
        let mut names: Vec<_> = Rule::ALL.into_iter().map(counter_name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Rule::ALL.len());
        assert!(names.iter().all(|n| n.starts_with("bfence_lfenced_")));
    }

    #[test]
    fn test_recorder_accumulates_runs() {
        let recorder = CliRecorder::new();
        let handle = recorder.handle();
        let stats = MitigationStats {
            branches: 3,
            loads: 5,
            returns: 1,
            indirect_calls: 0,
            indirect_jumps: 2,
        };

        metrics::with_local_recorder(&recorder, || {
            record_mitigations(&stats);
            record_mitigations(&stats);
            record_code_growth(100, 150);
            record_code_growth(0, 10);
        });

        assert_eq!(handle.get_counter("bfence_lfenced_branches_total"), Some(6));
        assert_eq!(handle.get_counter("bfence_lfenced_loads_total"), Some(10));
        assert_eq!(handle.get_counter("bfence_lfenced_indirect_calls_total"), Some(0));
        assert_eq!(handle.get_gauge("bfence_code_growth_ratio"), Some(1.5));
    }
}
