//! Metrics sinks for crank and block timings, inbound action counts and
//! mirrored kernel statistics.
//!
//! Recording is best-effort: sink methods return nothing and never fail the
//! block being executed.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder, exponential_buckets,
};

/// Bucket ladder (seconds) for whole-block and per-phase durations.
pub const BLOCK_SECONDS_BUCKETS: [f64; 15] = [
    0.1, 0.2, 0.3, 0.4, 0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 10.0, 15.0, 30.0,
];

pub trait MetricsSink: Send + Sync + fmt::Debug {
    /// Wall-clock cost of one kernel crank.
    fn observe_crank_seconds(&self, secs: f64);
    /// Wall-clock cost of the crank loop for one block.
    fn observe_block_seconds(&self, secs: f64);
    /// Per-block phase timing (`run`, `chain_save`, `commit`, ...).
    fn observe_phase_seconds(&self, phase: &str, secs: f64);
    fn inc_inbound_action(&self, kind: &str);
    fn set_kernel_stat(&self, name: &str, value: u64);
}

pub type SharedSink = Arc<dyn MetricsSink>;

/// A no-op sink for use in tests or when metrics are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopSink;

impl MetricsSink for NopSink {
    fn observe_crank_seconds(&self, _secs: f64) {}
    fn observe_block_seconds(&self, _secs: f64) {}
    fn observe_phase_seconds(&self, _phase: &str, _secs: f64) {}
    fn inc_inbound_action(&self, _kind: &str) {}
    fn set_kernel_stat(&self, _name: &str, _value: u64) {}
}

/// Prometheus-backed sink owning its own registry.
#[derive(Clone)]
pub struct PrometheusSink {
    registry: Registry,
    crank_seconds: Histogram,
    block_seconds: Histogram,
    phase_seconds: HistogramVec,
    inbound_actions: IntCounterVec,
    kernel_stats: IntGaugeVec,
}

impl fmt::Debug for PrometheusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrometheusSink").finish_non_exhaustive()
    }
}

impl PrometheusSink {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let crank_seconds = Histogram::with_opts(
            HistogramOpts::new("crankshaft_crank_seconds", "Wall-clock time of one kernel crank")
                .buckets(exponential_buckets(0.0005, 2.0, 14)?),
        )?;
        let block_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "crankshaft_block_seconds",
                "Wall-clock time of the crank loop for one block",
            )
            .buckets(BLOCK_SECONDS_BUCKETS.to_vec()),
        )?;
        let phase_seconds = HistogramVec::new(
            HistogramOpts::new(
                "crankshaft_block_phase_seconds",
                "Wall-clock time of each block phase",
            )
            .buckets(BLOCK_SECONDS_BUCKETS.to_vec()),
            &["phase"],
        )?;
        let inbound_actions = IntCounterVec::new(
            Opts::new(
                "crankshaft_inbound_actions_total",
                "Block actions executed, by type",
            ),
            &["kind"],
        )?;
        let kernel_stats = IntGaugeVec::new(
            Opts::new("crankshaft_kernel_stat", "Statistics reported by the kernel"),
            &["name"],
        )?;

        registry.register(Box::new(crank_seconds.clone()))?;
        registry.register(Box::new(block_seconds.clone()))?;
        registry.register(Box::new(phase_seconds.clone()))?;
        registry.register(Box::new(inbound_actions.clone()))?;
        registry.register(Box::new(kernel_stats.clone()))?;

        Ok(Self {
            registry,
            crank_seconds,
            block_seconds,
            phase_seconds,
            inbound_actions,
            kernel_stats,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(err) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            log::warn!("failed to encode metrics: {err}");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl MetricsSink for PrometheusSink {
    fn observe_crank_seconds(&self, secs: f64) {
        self.crank_seconds.observe(secs);
    }

    fn observe_block_seconds(&self, secs: f64) {
        self.block_seconds.observe(secs);
    }

    fn observe_phase_seconds(&self, phase: &str, secs: f64) {
        self.phase_seconds.with_label_values(&[phase]).observe(secs);
    }

    fn inc_inbound_action(&self, kind: &str) {
        self.inbound_actions.with_label_values(&[kind]).inc();
    }

    fn set_kernel_stat(&self, name: &str, value: u64) {
        let clamped = i64::try_from(value).unwrap_or(i64::MAX);
        self.kernel_stats.with_label_values(&[name]).set(clamped);
    }
}

/// Mirrors kernel statistics into a sink and flags schema drift.
///
/// With an empty expected list the first report defines the schema. Each
/// unexpected or missing name is warned about once.
#[derive(Debug, Default)]
pub struct StatsMirror {
    expected: Option<BTreeSet<String>>,
    warned: BTreeSet<String>,
}

impl StatsMirror {
    pub fn new(expected: &[String]) -> Self {
        Self {
            expected: if expected.is_empty() {
                None
            } else {
                Some(expected.iter().cloned().collect())
            },
            warned: BTreeSet::new(),
        }
    }

    /// Push `stats` into `sink`; returns the names newly warned about.
    pub fn mirror(&mut self, stats: &BTreeMap<String, u64>, sink: &dyn MetricsSink) -> Vec<String> {
        let expected = self
            .expected
            .get_or_insert_with(|| stats.keys().cloned().collect());
        let mut drift = Vec::new();
        for name in stats.keys() {
            if !expected.contains(name) && self.warned.insert(name.clone()) {
                log::warn!("unexpected kernel stat '{name}'");
                drift.push(name.clone());
            }
        }
        for name in expected.iter() {
            if !stats.contains_key(name) && self.warned.insert(name.clone()) {
                log::warn!("missing kernel stat '{name}'");
                drift.push(name.clone());
            }
        }
        for (name, value) in stats {
            sink.set_kernel_stat(name, *value);
        }
        drift
    }
}
