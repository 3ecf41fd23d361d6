//! Prometheus metrics for the witness worker

use lightwit_core::{LightError, Result};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Worker metrics registered on a Prometheus registry
#[derive(Clone)]
pub struct WorkerMetrics {
    registry: Registry,
    requests: IntCounterVec,
    delivery_failures: IntCounter,
    queue_depth: IntGauge,
    computation_seconds: Histogram,
}

impl WorkerMetrics {
    /// Register on a fresh registry
    pub fn new() -> Result<Self> {
        Self::register(Registry::new())
    }

    /// Register on an existing registry
    pub fn register(registry: Registry) -> Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new("lightwit_requests_total", "Witness requests by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let delivery_failures = IntCounter::new(
            "lightwit_delivery_failures_total",
            "Replies that could not be delivered",
        )
        .map_err(metrics_error)?;
        let queue_depth = IntGauge::new("lightwit_queue_depth", "Pending witness requests")
            .map_err(metrics_error)?;
        let computation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "lightwit_computation_seconds",
                "Witness computation wall time",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(requests.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(delivery_failures.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(queue_depth.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(computation_seconds.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            requests,
            delivery_failures,
            queue_depth,
            computation_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count one pipeline outcome ("replied", "rejected", "requeued")
    pub fn record_outcome(&self, outcome: &str) {
        self.requests.with_label_values(&[outcome]).inc();
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    pub fn observe_computation(&self, elapsed: Duration) {
        self.computation_seconds.observe(elapsed.as_secs_f64());
    }

    /// Outcome count, for tests and status output
    pub fn outcome_count(&self, outcome: &str) -> u64 {
        self.requests.with_label_values(&[outcome]).get()
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| LightError::Metrics(e.to_string()))
    }
}

fn metrics_error(e: prometheus::Error) -> LightError {
    LightError::Metrics(e.to_string())
}
