//! Metrics collection for launch runs
//!
//! A `Metrics` instance lives in the run context; there is no global registry.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Per-run metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub identities_generated: IntCounter,
    pub distribution_attempts: IntCounter,
    pub table_extend_batches: IntCounter,
    pub table_addresses: IntCounter,
    pub groups_packed: IntCounter,
    pub relay_accepts: IntCounter,
    pub relay_failures: IntCounter,
    pub bundles_confirmed: IntCounter,
    pub bundles_failed: IntCounter,

    // Gauges
    pub table_len: IntGauge,

    // Histograms
    pub stage_latency: Histogram,
    pub confirmation_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let identities_generated = IntCounter::with_opts(Opts::new(
            "identities_generated",
            "Ephemeral identities generated and persisted",
        ))?;

        let distribution_attempts = IntCounter::with_opts(Opts::new(
            "distribution_attempts",
            "Capital distribution transactions submitted",
        ))?;

        let table_extend_batches = IntCounter::with_opts(Opts::new(
            "table_extend_batches",
            "Lookup table extend batches confirmed",
        ))?;

        let table_addresses = IntCounter::with_opts(Opts::new(
            "table_addresses",
            "Addresses appended to the lookup table",
        ))?;

        let groups_packed =
            IntCounter::with_opts(Opts::new("groups_packed", "Transaction groups packed"))?;

        let relay_accepts =
            IntCounter::with_opts(Opts::new("relay_accepts", "Relay endpoints that accepted a bundle"))?;

        let relay_failures =
            IntCounter::with_opts(Opts::new("relay_failures", "Relay endpoints that failed a bundle post"))?;

        let bundles_confirmed =
            IntCounter::with_opts(Opts::new("bundles_confirmed", "Bundles confirmed on the ledger"))?;

        let bundles_failed = IntCounter::with_opts(Opts::new(
            "bundles_failed",
            "Bundles rejected, timed out or not accepted",
        ))?;

        let table_len = IntGauge::with_opts(Opts::new("table_len", "Current lookup table length"))?;

        let stage_latency = Histogram::with_opts(
            HistogramOpts::new("stage_latency_seconds", "Launch stage latency in seconds")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Time from submission to terminal confirmation state",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        )?;

        registry.register(Box::new(identities_generated.clone()))?;
        registry.register(Box::new(distribution_attempts.clone()))?;
        registry.register(Box::new(table_extend_batches.clone()))?;
        registry.register(Box::new(table_addresses.clone()))?;
        registry.register(Box::new(groups_packed.clone()))?;
        registry.register(Box::new(relay_accepts.clone()))?;
        registry.register(Box::new(relay_failures.clone()))?;
        registry.register(Box::new(bundles_confirmed.clone()))?;
        registry.register(Box::new(bundles_failed.clone()))?;
        registry.register(Box::new(table_len.clone()))?;
        registry.register(Box::new(stage_latency.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;

        Ok(Self {
            registry,
            identities_generated,
            distribution_attempts,
            table_extend_batches,
            table_addresses,
            groups_packed,
            relay_accepts,
            relay_failures,
            bundles_confirmed,
            bundles_failed,
            table_len,
            stage_latency,
            confirmation_latency,
        })
    }

    /// Get the prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the text exposition format
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Timer helper for measuring latency
pub struct Timer {
    start: Instant,
    histogram: Histogram,
}

impl Timer {
    /// Start a new timer
    pub fn start(histogram: &Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram: histogram.clone(),
        }
    }

    /// Stop the timer and record the duration
    pub fn finish(self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
