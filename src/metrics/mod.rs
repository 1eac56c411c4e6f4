//! Prometheus metrics
//!
//! Exposed at `/metrics` on the HTTP listener when enabled.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// All shim metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // HTTP
    pub requests_total: IntCounterVec,

    // Broker traffic
    pub messages_published_total: IntCounter,
    pub replies_received_total: IntCounter,
    pub reply_timeouts_total: IntCounter,
    pub cleanup_failures_total: IntCounterVec,

    // Latency
    pub reply_wait_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "shim_requests_total",
                "HTTP requests handled, by endpoint and outcome",
            ),
            &["endpoint", "outcome"],
        )
        .unwrap();

        let messages_published_total = IntCounter::with_opts(Opts::new(
            "shim_messages_published_total",
            "Messages published to the broker",
        ))
        .unwrap();

        let replies_received_total = IntCounter::with_opts(Opts::new(
            "shim_replies_received_total",
            "Replies received and acknowledged",
        ))
        .unwrap();

        let reply_timeouts_total = IntCounter::with_opts(Opts::new(
            "shim_reply_timeouts_total",
            "Requests that got no reply in time",
        ))
        .unwrap();

        let cleanup_failures_total = IntCounterVec::new(
            Opts::new(
                "shim_cleanup_failures_total",
                "Broker resources that failed to close, by resource",
            ),
            &["resource"],
        )
        .unwrap();

        let reply_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "shim_reply_wait_seconds",
                "Time spent waiting for a reply message",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
        )
        .unwrap();

        registry.register(Box::new(requests_total.clone())).unwrap();
        registry
            .register(Box::new(messages_published_total.clone()))
            .unwrap();
        registry
            .register(Box::new(replies_received_total.clone()))
            .unwrap();
        registry
            .register(Box::new(reply_timeouts_total.clone()))
            .unwrap();
        registry
            .register(Box::new(cleanup_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(reply_wait_seconds.clone()))
            .unwrap();

        Self {
            registry,
            requests_total,
            messages_published_total,
            replies_received_total,
            reply_timeouts_total,
            cleanup_failures_total,
            reply_wait_seconds,
        }
    }

    /// Count a finished HTTP request
    pub fn record_request(&self, endpoint: &str, outcome: &str) {
        self.requests_total
            .with_label_values(&[endpoint, outcome])
            .inc();
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> Result<(Vec<u8>, String), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((buffer, encoder.format_type().to_string()))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
