//! pulsar-http-shim - HTTP request/reply shim in front of Apache Pulsar
//!
//! Lets plain HTTP clients (typically functional test suites) drive
//! message-driven services: a POST body is published on one topic and the
//! next message on another topic comes back as the HTTP response.

pub mod bridge;
pub mod broker;
pub mod config;
pub mod http;
pub mod metrics;

pub use bridge::{Bridge, BridgeError, BridgeOptions, Reply};
pub use broker::{connector_for, BrokerError, MemoryBroker};
pub use config::Config;
pub use http::{AppState, HttpServer};
pub use metrics::Metrics;
