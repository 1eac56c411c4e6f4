//! Apache Pulsar backend
//!
//! Thin adapter from the broker traits onto the `pulsar` crate. Each
//! connection is its own `Pulsar` client, so nothing is pooled between
//! requests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use pulsar::consumer::Message;
use pulsar::{producer, Pulsar, SubType, TokioExecutor};
use tracing::debug;

use super::{
    BrokerError, Connection, Connector, Consumer, ConsumerOptions, InboundMessage, MessageId,
    OutboundMessage, Producer, Properties, Result, SubscriptionMode,
};

/// Connects to a Pulsar cluster at a fixed service URL
pub struct PulsarConnector {
    service_url: String,
}

impl PulsarConnector {
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
        }
    }
}

#[async_trait]
impl Connector for PulsarConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let client = Pulsar::builder(self.service_url.clone(), TokioExecutor)
            .build()
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        debug!(url = %self.service_url, "pulsar client connected");
        Ok(Box::new(PulsarConnection {
            client: Some(client),
        }))
    }
}

struct PulsarConnection {
    client: Option<Pulsar<TokioExecutor>>,
}

impl PulsarConnection {
    fn client(&self) -> Result<&Pulsar<TokioExecutor>> {
        self.client
            .as_ref()
            .ok_or_else(|| BrokerError::Other("connection is closed".to_string()))
    }
}

#[async_trait]
impl Connection for PulsarConnection {
    async fn create_producer(
        &mut self,
        topic: &str,
        name: Option<&str>,
    ) -> Result<Box<dyn Producer>> {
        let mut builder = self
            .client()
            .map_err(|e| BrokerError::Producer(e.to_string()))?
            .producer()
            .with_topic(topic);
        if let Some(name) = name {
            builder = builder.with_name(name);
        }
        let inner = builder
            .build()
            .await
            .map_err(|e| BrokerError::Producer(e.to_string()))?;
        Ok(Box::new(PulsarProducer { inner }))
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        options: &ConsumerOptions,
    ) -> Result<Box<dyn Consumer>> {
        let sub_type = match options.mode {
            SubscriptionMode::Exclusive => SubType::Exclusive,
            SubscriptionMode::Shared => SubType::Shared,
        };
        let mut builder = self
            .client()
            .map_err(|e| BrokerError::Consumer(e.to_string()))?
            .consumer()
            .with_topic(topic)
            .with_subscription(options.subscription.clone())
            .with_subscription_type(sub_type);
        if let Some(name) = &options.consumer_name {
            builder = builder.with_consumer_name(name.clone());
        }
        let inner = builder
            .build::<Vec<u8>>()
            .await
            .map_err(|e| BrokerError::Consumer(e.to_string()))?;
        Ok(Box::new(PulsarConsumer {
            inner,
            pending: HashMap::new(),
            next_id: 0,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the client shuts down its connection manager
        match self.client.take() {
            Some(_) => Ok(()),
            None => Err(BrokerError::Close("connection already closed".to_string())),
        }
    }
}

struct PulsarProducer {
    inner: pulsar::Producer<TokioExecutor>,
}

#[async_trait]
impl Producer for PulsarProducer {
    async fn send(&mut self, message: OutboundMessage) -> Result<()> {
        let message = producer::Message {
            payload: message.payload.to_vec(),
            properties: message.properties.into_iter().collect(),
            ..Default::default()
        };
        let receipt = self
            .inner
            .send_non_blocking(message)
            .await
            .map_err(|e| BrokerError::Send(e.to_string()))?;
        receipt
            .await
            .map_err(|e| BrokerError::Send(e.to_string()))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner
            .close()
            .await
            .map_err(|e| BrokerError::Close(e.to_string()))
    }
}

struct PulsarConsumer {
    inner: pulsar::Consumer<Vec<u8>, TokioExecutor>,
    /// Received messages awaiting acknowledgement
    pending: HashMap<MessageId, Message<Vec<u8>>>,
    next_id: u64,
}

#[async_trait]
impl Consumer for PulsarConsumer {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<InboundMessage>> {
        let msg = match tokio::time::timeout(timeout, self.inner.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => return Err(BrokerError::Receive("consumer stream ended".to_string())),
            Ok(Some(Err(e))) => return Err(BrokerError::Receive(e.to_string())),
            Ok(Some(Ok(msg))) => msg,
        };

        self.next_id += 1;
        let id = MessageId(self.next_id);
        let properties: Properties = msg
            .payload
            .metadata
            .properties
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
            .collect();
        let inbound = InboundMessage {
            id,
            topic: msg.topic.clone(),
            payload: Bytes::from(msg.payload.data.clone()),
            properties,
        };
        self.pending.insert(id, msg);
        Ok(Some(inbound))
    }

    async fn acknowledge(&mut self, message: &InboundMessage) -> Result<()> {
        let msg = self.pending.remove(&message.id).ok_or_else(|| {
            BrokerError::Acknowledge(format!("message {} is not pending", message.id))
        })?;
        self.inner
            .ack(&msg)
            .await
            .map_err(|e| BrokerError::Acknowledge(e.to_string()))
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.inner
            .unsubscribe()
            .await
            .map_err(|e| BrokerError::Unsubscribe(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.pending.clear();
        self.inner
            .close()
            .await
            .map_err(|e| BrokerError::Close(e.to_string()))
    }
}
