//! Per-request broker session
//!
//! Holds the connection, producer and consumer opened for one request.
//! `close` releases whatever was opened, each resource independently.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::broker::{
    BrokerError, Connection, Connector, Consumer, ConsumerOptions, InboundMessage,
    OutboundMessage, Producer, Result,
};
use crate::metrics::Metrics;

pub(crate) struct BrokerSession {
    connection: Option<Box<dyn Connection>>,
    producer: Option<Box<dyn Producer>>,
    consumer: Option<Box<dyn Consumer>>,
    metrics: Option<Arc<Metrics>>,
}

impl BrokerSession {
    pub(crate) fn new(metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            connection: None,
            producer: None,
            consumer: None,
            metrics,
        }
    }

    pub(crate) async fn connect(&mut self, connector: &dyn Connector) -> Result<()> {
        self.connection = Some(connector.connect().await?);
        Ok(())
    }

    fn connection(&mut self) -> Result<&mut Box<dyn Connection>> {
        self.connection
            .as_mut()
            .ok_or_else(|| BrokerError::Other("session is not connected".to_string()))
    }

    pub(crate) async fn subscribe(&mut self, topic: &str, options: &ConsumerOptions) -> Result<()> {
        let consumer = self.connection()?.subscribe(topic, options).await?;
        self.consumer = Some(consumer);
        Ok(())
    }

    pub(crate) async fn create_producer(&mut self, topic: &str, name: Option<&str>) -> Result<()> {
        let producer = self.connection()?.create_producer(topic, name).await?;
        self.producer = Some(producer);
        Ok(())
    }

    pub(crate) async fn send(&mut self, message: OutboundMessage) -> Result<()> {
        self.producer
            .as_mut()
            .ok_or_else(|| BrokerError::Send("no producer open".to_string()))?
            .send(message)
            .await
    }

    pub(crate) async fn receive(&mut self, timeout: Duration) -> Result<Option<InboundMessage>> {
        self.consumer
            .as_mut()
            .ok_or_else(|| BrokerError::Receive("no consumer open".to_string()))?
            .receive(timeout)
            .await
    }

    pub(crate) async fn acknowledge(&mut self, message: &InboundMessage) -> Result<()> {
        self.consumer
            .as_mut()
            .ok_or_else(|| BrokerError::Acknowledge("no consumer open".to_string()))?
            .acknowledge(message)
            .await
    }

    /// Tear down in order: consumer (unsubscribe, then close), producer,
    /// connection. Failures are logged and counted, never returned.
    pub(crate) async fn close(mut self) {
        let mut failures = 0;

        if let Some(mut consumer) = self.consumer.take() {
            if let Err(e) = consumer.unsubscribe().await {
                failures += 1;
                self.cleanup_failed("subscription", &e);
            }
            if let Err(e) = consumer.close().await {
                failures += 1;
                self.cleanup_failed("consumer", &e);
            }
        }

        if let Some(mut producer) = self.producer.take() {
            if let Err(e) = producer.close().await {
                failures += 1;
                self.cleanup_failed("producer", &e);
            }
        }

        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                failures += 1;
                self.cleanup_failed("connection", &e);
            }
        }

        debug!(failures, "Broker session closed");
    }

    fn cleanup_failed(&self, resource: &'static str, err: &BrokerError) {
        error!(resource, "Failed to release broker resource: {}", err);
        if let Some(metrics) = &self.metrics {
            metrics
                .cleanup_failures_total
                .with_label_values(&[resource])
                .inc();
        }
    }
}
