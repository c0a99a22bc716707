//! Prometheus metrics registry for the order relay.
//!
//! [`RelayMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and hand it to the
//! orchestration loop, the dispatcher and the HTTP router.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{Counter, CounterVec, Gauge, Opts, Registry};

/// All relay-level Prometheus metrics.
pub struct RelayMetrics {
    /// Completed orchestration cycles.
    pub cycles_total: Counter,
    /// Cycles that ended in an unhandled error.
    pub cycle_errors_total: Counter,
    /// Candidates produced, labelled by source.
    pub candidates_total: CounterVec,
    /// Whole-source collection failures, labelled by source.
    pub collector_errors_total: CounterVec,
    /// Successful per-recipient sends.
    pub deliveries_total: Counter,
    /// Failed per-recipient sends.
    pub delivery_failures_total: Counter,
    /// New delivery records written to the dedup store.
    pub records_written_total: Counter,
    /// Delivery records removed by the retention sweep.
    pub records_swept_total: Counter,
    /// Wall-clock duration of the last cycle in seconds.
    pub last_cycle_duration_seconds: Gauge,
    pub registry: Registry,
}

impl RelayMetrics {
    /// Create and register all metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cycles_total = Counter::with_opts(Opts::new(
            "order_relay_cycles_total",
            "Completed orchestration cycles",
        ))?;

        let cycle_errors_total = Counter::with_opts(Opts::new(
            "order_relay_cycle_errors_total",
            "Orchestration cycles that failed",
        ))?;

        let candidates_total = CounterVec::new(
            Opts::new("order_relay_candidates_total", "Candidates produced by source"),
            &["source"],
        )?;

        let collector_errors_total = CounterVec::new(
            Opts::new(
                "order_relay_collector_errors_total",
                "Source collections aborted by an error",
            ),
            &["source"],
        )?;

        let deliveries_total = Counter::with_opts(Opts::new(
            "order_relay_deliveries_total",
            "Messages delivered to recipients",
        ))?;

        let delivery_failures_total = Counter::with_opts(Opts::new(
            "order_relay_delivery_failures_total",
            "Messages that could not be delivered",
        ))?;

        let records_written_total = Counter::with_opts(Opts::new(
            "order_relay_records_written_total",
            "Delivery records written to the dedup store",
        ))?;

        let records_swept_total = Counter::with_opts(Opts::new(
            "order_relay_records_swept_total",
            "Delivery records removed by retention",
        ))?;

        let last_cycle_duration_seconds = Gauge::with_opts(Opts::new(
            "order_relay_last_cycle_duration_seconds",
            "Duration of the last orchestration cycle",
        ))?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycle_errors_total.clone()))?;
        registry.register(Box::new(candidates_total.clone()))?;
        registry.register(Box::new(collector_errors_total.clone()))?;
        registry.register(Box::new(deliveries_total.clone()))?;
        registry.register(Box::new(delivery_failures_total.clone()))?;
        registry.register(Box::new(records_written_total.clone()))?;
        registry.register(Box::new(records_swept_total.clone()))?;
        registry.register(Box::new(last_cycle_duration_seconds.clone()))?;

        Ok(Self {
            cycles_total,
            cycle_errors_total,
            candidates_total,
            collector_errors_total,
            deliveries_total,
            delivery_failures_total,
            records_written_total,
            records_swept_total,
            last_cycle_duration_seconds,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}
