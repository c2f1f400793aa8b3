//! # In-Memory Broker
//!
//! Thread-safe in-process broker for tests and embedded deployments.
//!
//! ## Features
//!
//! - **Hub of named brokers**: every address maps to a physical broker, and
//!   aliases let several address strings reach the same one
//! - **FIFO queues with in-flight tracking**: received messages stay in flight
//!   until acked; nack requeues at the front or dead-letters
//! - **Blocking receive**: receivers park on a `Notify` until a send arrives
//!   or the wait elapses
//! - **Reachability switch**: simulate a broker that refuses connections

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::messaging::connection::{BrokerConnection, BrokerConnector};
use crate::messaging::types::{
    DeliveryMode, MessageId, QueueStats, ReceiptHandle, ReceivedMessage,
};
use crate::messaging::{MessagingError, MessagingResult};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    body: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    receive_count: u32,
    mode: DeliveryMode,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<StoredMessage>,
    in_flight: HashMap<u64, StoredMessage>,
    dead_letters: Vec<StoredMessage>,
    total_sent: u64,
    total_received: u64,
    total_acked: u64,
}

/// One queue on an in-memory broker
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    state: Mutex<QueueState>,
    arrivals: Notify,
}

impl InMemoryQueue {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(QueueState::default()),
            arrivals: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, message: StoredMessage) {
        {
            let mut state = self.state.lock();
            state.total_sent += 1;
            state.pending.push_back(message);
        }
        self.arrivals.notify_one();
    }

    fn take_next(&self) -> Option<ReceivedMessage> {
        let mut state = self.state.lock();
        let mut message = state.pending.pop_front()?;
        message.receive_count += 1;
        state.total_received += 1;

        let received = ReceivedMessage {
            id: MessageId::from(message.id),
            receipt_handle: ReceiptHandle::from(message.id),
            queue_name: self.name.clone(),
            body: message.body.clone(),
            receive_count: message.receive_count,
            enqueued_at: message.enqueued_at,
        };
        state.in_flight.insert(message.id, message);
        Some(received)
    }

    fn settle(&self, receipt_handle: &ReceiptHandle, outcome: Settlement) -> MessagingResult<()> {
        let id: u64 = receipt_handle
            .as_str()
            .parse()
            .map_err(|_| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))?;

        let requeued = {
            let mut state = self.state.lock();
            let message = state
                .in_flight
                .remove(&id)
                .ok_or_else(|| MessagingError::message_not_found(id.to_string()))?;

            match outcome {
                Settlement::Ack => {
                    state.total_acked += 1;
                    false
                }
                Settlement::Requeue => {
                    state.pending.push_front(message);
                    true
                }
                Settlement::DeadLetter => {
                    state.dead_letters.push(message);
                    false
                }
            }
        };

        if requeued {
            self.arrivals.notify_one();
        }
        Ok(())
    }

    fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            queue_name: self.name.clone(),
            pending_count: state.pending.len() as u64,
            in_flight_count: state.in_flight.len() as u64,
            dead_letter_count: state.dead_letters.len() as u64,
            total_sent: state.total_sent,
            total_received: state.total_received,
            total_acked: state.total_acked,
        }
    }

    fn pending_bodies(&self) -> Vec<Vec<u8>> {
        let state = self.state.lock();
        state.pending.iter().map(|m| m.body.clone()).collect()
    }

    fn dead_letter_bodies(&self) -> Vec<Vec<u8>> {
        let state = self.state.lock();
        state.dead_letters.iter().map(|m| m.body.clone()).collect()
    }

    fn persistent_count(&self) -> usize {
        let state = self.state.lock();
        state
            .pending
            .iter()
            .chain(state.in_flight.values())
            .filter(|m| m.mode == DeliveryMode::Persistent)
            .count()
    }
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Ack,
    Requeue,
    DeadLetter,
}

/// A physical in-memory broker holding named queues
#[derive(Debug)]
pub struct InMemoryBroker {
    name: String,
    queues: Mutex<HashMap<String, Arc<InMemoryQueue>>>,
    next_id: AtomicU64,
    reachable: AtomicBool,
}

impl InMemoryBroker {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            queues: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get or create a queue by name
    pub fn queue(&self, queue_name: &str) -> Arc<InMemoryQueue> {
        let mut queues = self.queues.lock();
        queues
            .entry(queue_name.to_string())
            .or_insert_with(|| Arc::new(InMemoryQueue::new(queue_name)))
            .clone()
    }

    pub fn has_queue(&self, queue_name: &str) -> bool {
        self.queues.lock().contains_key(queue_name)
    }

    /// Enqueue a raw body directly, bypassing any connection
    pub fn inject(&self, queue_name: &str, body: impl Into<Vec<u8>>) -> MessageId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.queue(queue_name).push(StoredMessage {
            id,
            body: body.into(),
            enqueued_at: Utc::now(),
            receive_count: 0,
            mode: DeliveryMode::Persistent,
        });
        MessageId::from(id)
    }

    pub fn queue_stats(&self, queue_name: &str) -> QueueStats {
        match self.queues.lock().get(queue_name) {
            Some(queue) => queue.stats(),
            None => QueueStats::new(queue_name),
        }
    }

    /// Bodies waiting on the queue, oldest first, parsed as JSON where possible
    pub fn pending_messages(&self, queue_name: &str) -> Vec<serde_json::Value> {
        self.queue(queue_name)
            .pending_bodies()
            .into_iter()
            .filter_map(|body| serde_json::from_slice(&body).ok())
            .collect()
    }

    pub fn dead_letters(&self, queue_name: &str) -> Vec<Vec<u8>> {
        self.queue(queue_name).dead_letter_bodies()
    }

    pub fn persistent_count(&self, queue_name: &str) -> usize {
        self.queue(queue_name).persistent_count()
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Connector resolving address strings to in-memory brokers
///
/// An address with no alias names its own broker, created on first use.
#[derive(Debug, Default)]
pub struct InMemoryBrokerHub {
    brokers: Mutex<HashMap<String, Arc<InMemoryBroker>>>,
    aliases: Mutex<HashMap<String, String>>,
    connection_attempts: Mutex<HashMap<String, u64>>,
}

impl InMemoryBrokerHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `address` to the broker named `broker_name`
    pub fn alias(&self, address: impl Into<String>, broker_name: impl Into<String>) {
        self.aliases.lock().insert(address.into(), broker_name.into());
    }

    /// The physical broker an address reaches
    pub fn broker(&self, address: &str) -> Arc<InMemoryBroker> {
        let name = self
            .aliases
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_else(|| address.to_string());

        let mut brokers = self.brokers.lock();
        brokers
            .entry(name.clone())
            .or_insert_with(|| Arc::new(InMemoryBroker::new(&name)))
            .clone()
    }

    /// Make the broker behind `address` refuse (or accept) new connections
    /// and operations on existing ones
    pub fn set_reachable(&self, address: &str, reachable: bool) {
        self.broker(address)
            .reachable
            .store(reachable, Ordering::SeqCst);
    }

    /// How many times `connect` was called for this exact address string
    pub fn connection_attempts(&self, address: &str) -> u64 {
        self.connection_attempts
            .lock()
            .get(address)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBrokerHub {
    async fn connect(&self, address: &str) -> MessagingResult<Arc<dyn BrokerConnection>> {
        *self
            .connection_attempts
            .lock()
            .entry(address.to_string())
            .or_insert(0) += 1;

        let broker = self.broker(address);
        if !broker.is_reachable() {
            return Err(MessagingError::connection(address, "broker unreachable"));
        }

        debug!(broker = %address, physical = %broker.name(), "In-memory broker connection opened");
        Ok(Arc::new(InMemoryConnection {
            address: address.to_string(),
            broker,
            destinations: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }))
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

/// Session on an in-memory broker
#[derive(Debug)]
pub struct InMemoryConnection {
    address: String,
    broker: Arc<InMemoryBroker>,
    destinations: Mutex<HashMap<String, Arc<InMemoryQueue>>>,
    closed: AtomicBool,
}

impl InMemoryConnection {
    fn destination(&self, queue_name: &str) -> MessagingResult<Arc<InMemoryQueue>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MessagingError::connection_closed(&self.address));
        }
        if !self.broker.is_reachable() {
            return Err(MessagingError::connection(&self.address, "broker unreachable"));
        }

        let mut destinations = self.destinations.lock();
        Ok(destinations
            .entry(queue_name.to_string())
            .or_insert_with(|| self.broker.queue(queue_name))
            .clone())
    }

    /// Number of destination handles created on this session
    pub fn destination_count(&self) -> usize {
        self.destinations.lock().len()
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    fn address(&self) -> &str {
        &self.address
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }

    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.destination(queue_name).map(|_| ())
    }

    async fn send(
        &self,
        queue_name: &str,
        body: &[u8],
        mode: DeliveryMode,
    ) -> MessagingResult<MessageId> {
        let queue = self.destination(queue_name)?;
        let id = self.broker.next_id.fetch_add(1, Ordering::Relaxed);
        queue.push(StoredMessage {
            id,
            body: body.to_vec(),
            enqueued_at: Utc::now(),
            receive_count: 0,
            mode,
        });
        Ok(MessageId::from(id))
    }

    async fn receive(
        &self,
        queue_name: &str,
        wait: Duration,
    ) -> MessagingResult<Option<ReceivedMessage>> {
        let queue = self.destination(queue_name)?;
        let deadline = Instant::now() + wait;

        loop {
            let notified = queue.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = queue.take_next() {
                return Ok(Some(message));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(MessagingError::connection_closed(&self.address));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, queue_name: &str, receipt_handle: &ReceiptHandle) -> MessagingResult<()> {
        self.destination(queue_name)?
            .settle(receipt_handle, Settlement::Ack)
    }

    async fn nack(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> MessagingResult<()> {
        let outcome = if requeue {
            Settlement::Requeue
        } else {
            Settlement::DeadLetter
        };
        self.destination(queue_name)?.settle(receipt_handle, outcome)
    }

    async fn queue_stats(&self, queue_name: &str) -> MessagingResult<QueueStats> {
        Ok(self.destination(queue_name)?.stats())
    }

    async fn close(&self) -> MessagingResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(MessagingError::connection_closed(&self.address));
        }
        let destinations: Vec<Arc<InMemoryQueue>> =
            self.destinations.lock().drain().map(|(_, q)| q).collect();
        // Wake parked receivers so they observe the close
        for queue in destinations {
            queue.arrivals.notify_waiters();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
