//! Request-Reply Bridge
//!
//! Turns one HTTP call into one broker round trip:
//!
//! ```text
//! IDLE -> CONNECTING -> CONSUMING -> PRODUCING -> AWAITING_REPLY -> ACKNOWLEDGING -> CLOSING -> DONE
//! ```
//!
//! `send_only` stops after PRODUCING. Whatever step fails, the session goes
//! through CLOSING, where every opened resource is released independently.
//!
//! There is no correlation id. A reply is simply the next message on the
//! read topic's shared subscription, so callers must not share read topics
//! between concurrent requests.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use hyper::HeaderMap;
use tracing::{debug, error, info};

use crate::broker::{BrokerError, Connector, ConsumerOptions, OutboundMessage, Properties};
use crate::metrics::Metrics;

mod headers;
mod session;


pub use headers::{
    filter_headers, is_excluded, reply_headers, DEFAULT_REPLY_CONTENT_TYPE, EXCLUDED_HEADERS,
    FRAMING_HEADERS,
};

use session::BrokerSession;

/// Default time to wait for a reply
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default subscription and consumer name for the reply consumer
pub const DEFAULT_SUBSCRIPTION_NAME: &str = "pulsar-http-shim";

/// Default producer name on the request/reply path
pub const DEFAULT_PRODUCER_NAME: &str = "TestAppPusher";

/// Steps of a bridged request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connecting,
    Consuming,
    Producing,
    AwaitingReply,
    Acknowledging,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connecting => "connecting",
            Stage::Consuming => "consuming",
            Stage::Producing => "producing",
            Stage::AwaitingReply => "awaiting reply",
            Stage::Acknowledging => "acknowledging",
        };
        f.write_str(name)
    }
}

/// Bridge error types
#[derive(Debug)]
pub enum BridgeError {
    /// A broker call failed
    Broker { stage: Stage, source: BrokerError },
    /// No reply arrived in time
    ReplyTimeout { topic: String, timeout: Duration },
}

impl BridgeError {
    /// Step of the request that failed
    pub fn stage(&self) -> Stage {
        match self {
            BridgeError::Broker { stage, .. } => *stage,
            BridgeError::ReplyTimeout { .. } => Stage::AwaitingReply,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Broker { stage, source } => write!(f, "{} failed: {}", stage, source),
            BridgeError::ReplyTimeout { topic, timeout } => {
                write!(f, "no reply on '{}' within {:?}", topic, timeout)
            }
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Broker { source, .. } => Some(source),
            BridgeError::ReplyTimeout { .. } => None,
        }
    }
}

fn at(stage: Stage) -> impl FnOnce(BrokerError) -> BridgeError {
    move |source| BridgeError::Broker { stage, source }
}

/// Bridge settings
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// How long `send_and_wait` waits for the reply
    pub reply_timeout: Duration,
    /// Shared subscription used on every read topic
    pub subscription_name: String,
    /// Consumer name reported to the broker
    pub consumer_name: String,
    /// Producer name on the request/reply path
    pub producer_name: String,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            subscription_name: DEFAULT_SUBSCRIPTION_NAME.to_string(),
            consumer_name: DEFAULT_SUBSCRIPTION_NAME.to_string(),
            producer_name: DEFAULT_PRODUCER_NAME.to_string(),
        }
    }
}

/// A reply taken from the read topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Payload decoded as text
    pub body: String,
    /// Message properties, returned to the caller as headers
    pub properties: Properties,
}

/// Request-reply bridge. Cheap to clone; clones share the connector.
#[derive(Clone)]
pub struct Bridge {
    connector: Arc<dyn Connector>,
    options: BridgeOptions,
    metrics: Option<Arc<Metrics>>,
}

impl Bridge {
    pub fn new(connector: Arc<dyn Connector>, options: BridgeOptions) -> Self {
        Self {
            connector,
            options,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Publish `body` on `write_topic` and return the next message from
    /// `read_topic`.
    pub async fn send_and_wait(
        &self,
        write_topic: &str,
        read_topic: &str,
        body: Bytes,
        headers: &HeaderMap,
    ) -> Result<Reply, BridgeError> {
        let message = OutboundMessage::new(body, filter_headers(headers));
        let mut session = BrokerSession::new(self.metrics.clone());

        let result = self
            .exchange(&mut session, write_topic, read_topic, message)
            .await;
        if let Err(e) = &result {
            error!(write_topic, read_topic, stage = %e.stage(), "Request failed: {}", e);
        }

        session.close().await;
        result
    }

    async fn exchange(
        &self,
        session: &mut BrokerSession,
        write_topic: &str,
        read_topic: &str,
        message: OutboundMessage,
    ) -> Result<Reply, BridgeError> {
        let consumer_options = ConsumerOptions::shared(self.options.subscription_name.clone())
            .with_consumer_name(self.options.consumer_name.clone());

        session
            .connect(self.connector.as_ref())
            .await
            .map_err(at(Stage::Connecting))?;
        session
            .subscribe(read_topic, &consumer_options)
            .await
            .map_err(at(Stage::Consuming))?;
        session
            .create_producer(write_topic, Some(&self.options.producer_name))
            .await
            .map_err(at(Stage::Producing))?;

        info!(write_topic, "Sending request");
        session.send(message).await.map_err(at(Stage::Producing))?;
        info!(write_topic, "Sent request");
        if let Some(metrics) = &self.metrics {
            metrics.messages_published_total.inc();
        }

        let started = Instant::now();
        let received = session
            .receive(self.options.reply_timeout)
            .await
            .map_err(at(Stage::AwaitingReply))?;
        if let Some(metrics) = &self.metrics {
            metrics
                .reply_wait_seconds
                .observe(started.elapsed().as_secs_f64());
        }

        let Some(response) = received else {
            if let Some(metrics) = &self.metrics {
                metrics.reply_timeouts_total.inc();
            }
            return Err(BridgeError::ReplyTimeout {
                topic: read_topic.to_string(),
                timeout: self.options.reply_timeout,
            });
        };
        info!(read_topic, "Received response");

        let body = response.text();
        debug!(read_topic, body = %body, "Reply payload");
        session
            .acknowledge(&response)
            .await
            .map_err(at(Stage::Acknowledging))?;
        if let Some(metrics) = &self.metrics {
            metrics.replies_received_total.inc();
        }

        Ok(Reply {
            body,
            properties: response.properties,
        })
    }

    /// Publish `body` on `topic` without waiting for anything back
    pub async fn send_only(
        &self,
        topic: &str,
        body: Bytes,
        headers: &HeaderMap,
    ) -> Result<(), BridgeError> {
        let message = OutboundMessage::new(body, filter_headers(headers));
        let mut session = BrokerSession::new(self.metrics.clone());

        let result = self.publish(&mut session, topic, message).await;
        if let Err(e) = &result {
            error!(topic, stage = %e.stage(), "Write failed: {}", e);
        }

        session.close().await;
        result
    }

    async fn publish(
        &self,
        session: &mut BrokerSession,
        topic: &str,
        message: OutboundMessage,
    ) -> Result<(), BridgeError> {
        session
            .connect(self.connector.as_ref())
            .await
            .map_err(at(Stage::Connecting))?;
        session
            .create_producer(topic, None)
            .await
            .map_err(at(Stage::Producing))?;
        session.send(message).await.map_err(at(Stage::Producing))?;
        debug!(topic, "Message written");
        if let Some(metrics) = &self.metrics {
            metrics.messages_published_total.inc();
        }
        Ok(())
    }
}
