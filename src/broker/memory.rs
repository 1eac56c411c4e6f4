//! In-process broker
//!
//! Topics live in process memory. Each topic keeps an append-only log of
//! everything published to it and a set of named subscriptions. A
//! subscription starts at the end of the log and buffers new messages until a
//! consumer takes them. Received messages stay pending until acknowledged;
//! pending messages of a consumer that goes away are put back at the front of
//! the backlog for redelivery.
//!
//! Nothing is ever pruned: topic logs and topics live as long as the broker,
//! so memory grows with the total traffic of a run. Meant for tests and local
//! runs, not long-lived deployments.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{
    BrokerError, Connection, Connector, Consumer, ConsumerOptions, InboundMessage, MessageId,
    OutboundMessage, Producer, Properties, Result, SubscriptionMode,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    payload: Bytes,
    properties: Properties,
}

impl StoredMessage {
    fn to_inbound(&self, topic: &str) -> InboundMessage {
        InboundMessage {
            id: self.id,
            topic: topic.to_string(),
            payload: self.payload.clone(),
            properties: self.properties.clone(),
        }
    }
}

struct Subscription {
    mode: SubscriptionMode,
    backlog: VecDeque<StoredMessage>,
    /// Delivered but not yet acknowledged, keyed by message id
    pending: HashMap<MessageId, (u64, StoredMessage)>,
    consumers: HashSet<u64>,
    notify: Arc<Notify>,
}

impl Subscription {
    fn new(mode: SubscriptionMode) -> Self {
        Self {
            mode,
            backlog: VecDeque::new(),
            pending: HashMap::new(),
            consumers: HashSet::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Return the pending messages of `consumer_id` to the backlog head
    fn redeliver(&mut self, consumer_id: u64) {
        let mut returned: Vec<StoredMessage> = Vec::new();
        self.pending.retain(|_, (owner, msg)| {
            if *owner == consumer_id {
                returned.push(msg.clone());
                false
            } else {
                true
            }
        });
        if returned.is_empty() {
            return;
        }
        returned.sort_by_key(|m| m.id);
        for msg in returned.into_iter().rev() {
            self.backlog.push_front(msg);
        }
        self.notify.notify_one();
    }
}

#[derive(Default)]
struct Topic {
    log: Vec<StoredMessage>,
    subscriptions: HashMap<String, Subscription>,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, Topic>,
    next_message_id: u64,
    next_consumer_id: u64,
    stats: MemoryStats,
}

impl State {
    fn subscription_mut(&mut self, topic: &str, name: &str) -> Option<&mut Subscription> {
        self.topics
            .get_mut(topic)
            .and_then(|t| t.subscriptions.get_mut(name))
    }
}

/// Counts of currently open resources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub connections: usize,
    pub producers: usize,
    pub consumers: usize,
}

/// In-process broker. Clones share the same topics.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish directly to `topic`, returning the assigned message id
    pub fn publish(&self, topic: &str, message: OutboundMessage) -> MessageId {
        let mut state = self.state.lock();
        state.next_message_id += 1;
        let stored = StoredMessage {
            id: MessageId(state.next_message_id),
            payload: message.payload,
            properties: message.properties,
        };

        let entry = state.topics.entry(topic.to_string()).or_default();
        for sub in entry.subscriptions.values_mut() {
            sub.backlog.push_back(stored.clone());
            sub.notify.notify_one();
        }
        let id = stored.id;
        entry.log.push(stored);
        trace!(topic, %id, "memory broker stored message");
        id
    }

    /// Everything ever published to `topic`, oldest first
    pub fn messages(&self, topic: &str) -> Vec<InboundMessage> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|t| t.log.iter().map(|m| m.to_inbound(topic)).collect())
            .unwrap_or_default()
    }

    /// Names of the subscriptions currently registered on `topic`
    pub fn subscriptions(&self, topic: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .topics
            .get(topic)
            .map(|t| t.subscriptions.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Messages waiting for delivery on a subscription
    pub fn backlog_len(&self, topic: &str, subscription: &str) -> usize {
        self.state
            .lock()
            .subscription_mut(topic, subscription)
            .map(|s| s.backlog.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> MemoryStats {
        self.state.lock().stats
    }

    fn attach_consumer(&self, topic: &str, options: &ConsumerOptions) -> Result<u64> {
        let mut state = self.state.lock();
        state.next_consumer_id += 1;
        let consumer_id = state.next_consumer_id;

        let sub = state
            .topics
            .entry(topic.to_string())
            .or_default()
            .subscriptions
            .entry(options.subscription.clone())
            .or_insert_with(|| Subscription::new(options.mode));

        if !sub.consumers.is_empty()
            && (sub.mode != options.mode || options.mode == SubscriptionMode::Exclusive)
        {
            return Err(BrokerError::Consumer(format!(
                "subscription '{}' on '{}' is busy",
                options.subscription, topic
            )));
        }
        sub.mode = options.mode;
        sub.consumers.insert(consumer_id);
        state.stats.consumers += 1;
        Ok(consumer_id)
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        self.state.lock().stats.connections += 1;
        Ok(Box::new(MemoryConnection {
            broker: self.clone(),
            closed: false,
        }))
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
    closed: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BrokerError::Other("connection is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn create_producer(
        &mut self,
        topic: &str,
        name: Option<&str>,
    ) -> Result<Box<dyn Producer>> {
        self.ensure_open()
            .map_err(|e| BrokerError::Producer(e.to_string()))?;
        self.broker.state.lock().stats.producers += 1;
        debug!(topic, producer = name.unwrap_or("-"), "memory producer created");
        Ok(Box::new(MemoryProducer {
            broker: self.broker.clone(),
            topic: topic.to_string(),
            closed: false,
        }))
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        options: &ConsumerOptions,
    ) -> Result<Box<dyn Consumer>> {
        self.ensure_open()
            .map_err(|e| BrokerError::Consumer(e.to_string()))?;
        let consumer_id = self.broker.attach_consumer(topic, options)?;
        debug!(
            topic,
            subscription = %options.subscription,
            consumer_id,
            "memory consumer attached"
        );
        Ok(Box::new(MemoryConsumer {
            broker: self.broker.clone(),
            topic: topic.to_string(),
            subscription: options.subscription.clone(),
            consumer_id,
            closed: false,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.ensure_open()
            .map_err(|e| BrokerError::Close(e.to_string()))?;
        self.closed = true;
        self.broker.state.lock().stats.connections -= 1;
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.broker.state.lock().stats.connections -= 1;
        }
    }
}

struct MemoryProducer {
    broker: MemoryBroker,
    topic: String,
    closed: bool,
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn send(&mut self, message: OutboundMessage) -> Result<()> {
        if self.closed {
            return Err(BrokerError::Send("producer is closed".to_string()));
        }
        self.broker.publish(&self.topic, message);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(BrokerError::Close("producer already closed".to_string()));
        }
        self.closed = true;
        self.broker.state.lock().stats.producers -= 1;
        Ok(())
    }
}

impl Drop for MemoryProducer {
    fn drop(&mut self) {
        if !self.closed {
            self.broker.state.lock().stats.producers -= 1;
        }
    }
}

struct MemoryConsumer {
    broker: MemoryBroker,
    topic: String,
    subscription: String,
    consumer_id: u64,
    closed: bool,
}

impl MemoryConsumer {
    fn detach(&mut self) {
        self.closed = true;
        let mut state = self.broker.state.lock();
        state.stats.consumers -= 1;
        if let Some(sub) = state.subscription_mut(&self.topic, &self.subscription) {
            sub.consumers.remove(&self.consumer_id);
            sub.redeliver(self.consumer_id);
        }
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<InboundMessage>> {
        if self.closed {
            return Err(BrokerError::Receive("consumer is closed".to_string()));
        }
        let deadline = Instant::now() + timeout;

        loop {
            let notify = {
                let mut state = self.broker.state.lock();
                let sub = state
                    .subscription_mut(&self.topic, &self.subscription)
                    .ok_or_else(|| {
                        BrokerError::Receive(format!(
                            "subscription '{}' no longer exists",
                            self.subscription
                        ))
                    })?;

                if let Some(msg) = sub.backlog.pop_front() {
                    // Wake the next waiter if more is queued
                    if !sub.backlog.is_empty() {
                        sub.notify.notify_one();
                    }
                    let inbound = msg.to_inbound(&self.topic);
                    sub.pending.insert(msg.id, (self.consumer_id, msg));
                    return Ok(Some(inbound));
                }
                sub.notify.clone()
            };

            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn acknowledge(&mut self, message: &InboundMessage) -> Result<()> {
        let mut state = self.broker.state.lock();
        let sub = state
            .subscription_mut(&self.topic, &self.subscription)
            .ok_or_else(|| BrokerError::Acknowledge("subscription no longer exists".to_string()))?;

        let owned = matches!(
            sub.pending.get(&message.id),
            Some((owner, _)) if *owner == self.consumer_id
        );
        if !owned {
            return Err(BrokerError::Acknowledge(format!(
                "message {} is not pending for this consumer",
                message.id
            )));
        }
        sub.pending.remove(&message.id);
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        let mut state = self.broker.state.lock();
        let topic = state
            .topics
            .get_mut(&self.topic)
            .ok_or_else(|| BrokerError::Unsubscribe(format!("unknown topic '{}'", self.topic)))?;
        let sub = topic.subscriptions.get(&self.subscription).ok_or_else(|| {
            BrokerError::Unsubscribe(format!("unknown subscription '{}'", self.subscription))
        })?;

        if sub.consumers.iter().any(|id| *id != self.consumer_id) {
            return Err(BrokerError::Unsubscribe(format!(
                "subscription '{}' has other active consumers",
                self.subscription
            )));
        }
        topic.subscriptions.remove(&self.subscription);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(BrokerError::Close("consumer already closed".to_string()));
        }
        self.detach();
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        if !self.closed {
            self.detach();
        }
    }
}
