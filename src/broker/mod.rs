//! Broker Client Abstraction
//!
//! The narrow publish/subscribe surface the bridge needs from a message
//! broker: connect, create producers and consumers, publish, receive with a
//! timeout, acknowledge, unsubscribe and close. Backends:
//!
//! - `memory://` - in-process broker, always available
//! - `pulsar://`, `pulsar+ssl://` - Apache Pulsar (cargo feature `pulsar`)
//!
//! Every resource handed out here is owned by exactly one request. Closing is
//! explicit since teardown is async and has to be observable.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

mod error;
pub mod memory;
#[cfg(feature = "pulsar")]
pub mod pulsar;

pub use error::{BrokerError, Result};
pub use memory::{MemoryBroker, MemoryStats};

/// Message properties (key/value metadata carried next to the payload)
pub type Properties = BTreeMap<String, String>;

/// A message to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub payload: Bytes,
    pub properties: Properties,
}

impl OutboundMessage {
    pub fn new(payload: impl Into<Bytes>, properties: Properties) -> Self {
        Self {
            payload: payload.into(),
            properties,
        }
    }
}

/// Backend-local message handle used for acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message delivered to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: MessageId,
    pub topic: String,
    pub payload: Bytes,
    pub properties: Properties,
}

impl InboundMessage {
    /// Payload decoded as text, replacing invalid UTF-8 sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// How messages are distributed between consumers of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionMode {
    /// Only a single consumer may attach
    Exclusive,
    /// Consumers share the subscription, each message goes to one of them
    #[default]
    Shared,
}

/// Options for creating a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Subscription name
    pub subscription: String,
    /// Consumer name reported to the broker
    pub consumer_name: Option<String>,
    /// Distribution mode
    pub mode: SubscriptionMode,
}

impl ConsumerOptions {
    pub fn shared(subscription: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
            consumer_name: None,
            mode: SubscriptionMode::Shared,
        }
    }

    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = Some(name.into());
        self
    }
}

/// Opens broker connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new client connection to the broker
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// A client connection
#[async_trait]
pub trait Connection: Send {
    /// Create a producer on `topic`
    async fn create_producer(&mut self, topic: &str, name: Option<&str>)
        -> Result<Box<dyn Producer>>;

    /// Subscribe to `topic`
    async fn subscribe(
        &mut self,
        topic: &str,
        options: &ConsumerOptions,
    ) -> Result<Box<dyn Consumer>>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// A producer bound to one topic
#[async_trait]
pub trait Producer: Send {
    /// Publish a message and wait for the broker to accept it
    async fn send(&mut self, message: OutboundMessage) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// A consumer bound to one topic and subscription
#[async_trait]
pub trait Consumer: Send {
    /// Wait up to `timeout` for the next message. `Ok(None)` means nothing
    /// arrived in time.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<InboundMessage>>;

    /// Acknowledge a message received from this consumer
    async fn acknowledge(&mut self, message: &InboundMessage) -> Result<()>;

    /// Remove the subscription from the broker
    async fn unsubscribe(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Build the connector for a broker service URL
pub fn connector_for(service_url: &str) -> Result<Arc<dyn Connector>> {
    let url = Url::parse(service_url)
        .map_err(|e| BrokerError::InvalidUrl(format!("{} ({})", service_url, e)))?;

    match url.scheme() {
        "memory" => Ok(Arc::new(MemoryBroker::new())),
        #[cfg(feature = "pulsar")]
        "pulsar" | "pulsar+ssl" => Ok(Arc::new(pulsar::PulsarConnector::new(service_url))),
        other => Err(BrokerError::UnsupportedScheme(other.to_string())),
    }
}

/// Whether this build can talk to `scheme`
pub fn scheme_supported(scheme: &str) -> bool {
    match scheme {
        "memory" => true,
        "pulsar" | "pulsar+ssl" => cfg!(feature = "pulsar"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_for_memory() {
        assert!(connector_for("memory://local").is_ok());
    }

    #[test]
    fn test_connector_for_invalid_url() {
        assert!(matches!(
            connector_for("not a url"),
            Err(BrokerError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_connector_for_unknown_scheme() {
        assert!(matches!(
            connector_for("amqp://localhost:5672"),
            Err(BrokerError::UnsupportedScheme(s)) if s == "amqp"
        ));
    }

    #[cfg(not(feature = "pulsar"))]
    #[test]
    fn test_pulsar_scheme_needs_feature() {
        assert!(!scheme_supported("pulsar"));
        assert!(matches!(
            connector_for("pulsar://localhost:6650"),
            Err(BrokerError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_inbound_text_is_lossy() {
        let msg = InboundMessage {
            id: MessageId(1),
            topic: "t".to_string(),
            payload: Bytes::from_static(b"po\xffng"),
            properties: Properties::new(),
        };
        assert_eq!(msg.text(), "po\u{fffd}ng");
    }
}
