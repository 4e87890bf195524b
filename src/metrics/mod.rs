//! Prometheus metrics for the multi-host pool manager
//!
//! All managers in a process share one registry.

use prometheus::{
    Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry,
};
use std::sync::OnceLock;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Topology metrics
    /// Endpoints per role (master / replica / unclassified)
    pub endpoints: IntGaugeVec,

    // Probe metrics
    /// Role probe results by outcome
    pub probe_total: IntCounterVec,
    /// Role probe latency histogram (in seconds)
    pub probe_duration_seconds: Histogram,
    /// Endpoint pool creation attempts by outcome
    pub pool_create_total: IntCounterVec,

    // Acquire metrics
    /// Acquire attempts by requested target and outcome
    pub acquire_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let endpoints = IntGaugeVec::new(
            Opts::new("multihost_endpoints", "Number of endpoints per detected role"),
            &["role"], // master, replica, unclassified
        )
        .unwrap();

        let probe_total = IntCounterVec::new(
            Opts::new("multihost_probe_total", "Total number of role probes"),
            &["result"], // master, replica, error, timeout
        )
        .unwrap();

        let probe_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "multihost_probe_duration_seconds",
                "Role probe latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )
        .unwrap();

        let pool_create_total = IntCounterVec::new(
            Opts::new(
                "multihost_pool_create_total",
                "Total number of endpoint pool creation attempts",
            ),
            &["result"], // ok, error, timeout
        )
        .unwrap();

        let acquire_total = IntCounterVec::new(
            Opts::new("multihost_acquire_total", "Total number of acquire requests"),
            &["target", "result"],
        )
        .unwrap();

        registry.register(Box::new(endpoints.clone())).unwrap();
        registry.register(Box::new(probe_total.clone())).unwrap();
        registry
            .register(Box::new(probe_duration_seconds.clone()))
            .unwrap();
        registry.register(Box::new(pool_create_total.clone())).unwrap();
        registry.register(Box::new(acquire_total.clone())).unwrap();

        Self {
            registry,
            endpoints,
            probe_total,
            probe_duration_seconds,
            pool_create_total,
            acquire_total,
        }
    }

    /// Record a probe outcome and, when it completed, its latency
    pub fn record_probe(&self, result: &str, duration_secs: Option<f64>) {
        self.probe_total.with_label_values(&[result]).inc();
        if let Some(secs) = duration_secs {
            self.probe_duration_seconds.observe(secs);
        }
    }

    pub fn record_pool_create(&self, result: &str) {
        self.pool_create_total.with_label_values(&[result]).inc();
    }

    pub fn record_acquire(&self, target: &str, result: &str) {
        self.acquire_total.with_label_values(&[target, result]).inc();
    }

    /// Update endpoint counts per role
    pub fn set_endpoints(&self, masters: i64, replicas: i64, unclassified: i64) {
        self.endpoints.with_label_values(&["master"]).set(masters);
        self.endpoints.with_label_values(&["replica"]).set(replicas);
        self.endpoints
            .with_label_values(&["unclassified"])
            .set(unclassified);
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
