//! HTTP Surface
//!
//! HTTP/1.1 listener exposing the bridge:
//!
//! - `POST /pulsar/send?writeQueueName=<topic>&readQueueName=<topic>` - publish
//!   the body and answer with the reply
//! - `POST /pulsar/write?queueName=<topic>` - publish the body only
//! - `GET /health`, `GET /ready` - liveness/readiness
//! - `GET /metrics` - Prometheus metrics (when enabled)

use std::sync::Arc;

use crate::bridge::Bridge;
use crate::metrics::Metrics;

mod routes;
mod server;


pub use routes::handle_request;
pub use server::HttpServer;

/// Request path of the send-and-wait endpoint
pub const SEND_PATH: &str = "/pulsar/send";
/// Request path of the fire-and-forget endpoint
pub const WRITE_PATH: &str = "/pulsar/write";

/// Shared state handed to every request
#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
    pub metrics: Option<Arc<Metrics>>,
    /// Largest accepted request body in bytes (0 = unlimited)
    pub max_body_size: usize,
}

impl AppState {
    pub fn new(bridge: Bridge) -> Self {
        Self {
            bridge,
            metrics: None,
            max_body_size: 0,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    fn record(&self, endpoint: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(endpoint, outcome);
        }
    }
}
