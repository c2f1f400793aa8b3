//! # PostgreSQL Message Queue Provider (pgmq)
//!
//! Broker connections backed by the `pgmq` extension. The broker address is a
//! PostgreSQL connection URL; each distinct URL string gets its own sqlx pool,
//! shared with the `PGMQueue` client. Queue stats come from `pgmq.metrics()`.
//!
//! pgmq has no blocking receive, so `receive` polls with a visibility timeout
//! until a message shows up or the wait elapses. Ack deletes the message;
//! nack without requeue archives it to `a_{queue}`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use ::pgmq::PGMQueue;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::messaging::connection::{BrokerConnection, BrokerConnector};
use crate::messaging::types::{
    DeliveryMode, MessageId, QueueStats, ReceiptHandle, ReceivedMessage,
};
use crate::messaging::{MessagingError, MessagingResult};

/// Seconds a received message stays invisible to other consumers
const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: i32 = 30;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone)]
pub struct PgmqConnector {
    visibility_timeout_seconds: i32,
    max_connections: u32,
}

impl PgmqConnector {
    pub fn new() -> Self {
        Self {
            visibility_timeout_seconds: DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn with_visibility_timeout(mut self, seconds: i32) -> Self {
        self.visibility_timeout_seconds = seconds;
        self
    }
}

impl Default for PgmqConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerConnector for PgmqConnector {
    async fn connect(&self, address: &str) -> MessagingResult<Arc<dyn BrokerConnection>> {
        info!(broker = %address, "Connecting to pgmq");

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(address)
            .await
            .map_err(|e| MessagingError::connection(address, e.to_string()))?;
        let pgmq = PGMQueue::new_with_pool(pool.clone()).await;

        Ok(Arc::new(PgmqConnection {
            address: address.to_string(),
            pgmq,
            pool,
            visibility_timeout_seconds: self.visibility_timeout_seconds,
            created_queues: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }))
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }
}

pub struct PgmqConnection {
    address: String,
    pgmq: PGMQueue,
    pool: PgPool,
    visibility_timeout_seconds: i32,
    created_queues: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for PgmqConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgmqConnection")
            .field("address", &self.address)
            .field("pgmq", &"PGMQueue")
            .field("visibility_timeout_seconds", &self.visibility_timeout_seconds)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl PgmqConnection {
    fn check_open(&self) -> MessagingResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MessagingError::connection_closed(&self.address));
        }
        Ok(())
    }

    fn receipt_id(receipt_handle: &ReceiptHandle) -> MessagingResult<i64> {
        receipt_handle
            .as_i64()
            .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
    }
}

#[async_trait]
impl BrokerConnection for PgmqConnection {
    fn address(&self) -> &str {
        &self.address
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }

    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.check_open()?;
        if self.created_queues.lock().contains(queue_name) {
            return Ok(());
        }

        debug!(queue = %queue_name, "Creating pgmq queue");
        self.pgmq
            .create(queue_name)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "create", e.to_string()))?;
        self.created_queues.lock().insert(queue_name.to_string());
        Ok(())
    }

    async fn send(
        &self,
        queue_name: &str,
        body: &[u8],
        mode: DeliveryMode,
    ) -> MessagingResult<MessageId> {
        self.ensure_queue(queue_name).await?;
        if mode == DeliveryMode::NonPersistent {
            debug!(queue = %queue_name, "pgmq messages are always persistent");
        }

        let json: serde_json::Value = serde_json::from_slice(body)?;
        let message_id = self
            .pgmq
            .send(queue_name, &json)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "send", e.to_string()))?;
        Ok(MessageId::from(message_id))
    }

    async fn receive(
        &self,
        queue_name: &str,
        wait: Duration,
    ) -> MessagingResult<Option<ReceivedMessage>> {
        self.ensure_queue(queue_name).await?;
        let deadline = Instant::now() + wait;

        loop {
            self.check_open()?;
            let message = self
                .pgmq
                .read::<serde_json::Value>(queue_name, Some(self.visibility_timeout_seconds))
                .await
                .map_err(|e| MessagingError::queue_operation(queue_name, "read", e.to_string()))?;

            if let Some(message) = message {
                let body = serde_json::to_vec(&message.message)?;
                return Ok(Some(ReceivedMessage {
                    id: MessageId::from(message.msg_id),
                    receipt_handle: ReceiptHandle::from(message.msg_id),
                    queue_name: queue_name.to_string(),
                    body,
                    receive_count: message.read_ct.max(1) as u32,
                    enqueued_at: message.enqueued_at,
                }));
            }

            if Instant::now() + POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn ack(&self, queue_name: &str, receipt_handle: &ReceiptHandle) -> MessagingResult<()> {
        self.check_open()?;
        let message_id = Self::receipt_id(receipt_handle)?;
        self.pgmq
            .delete(queue_name, message_id)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "delete", e.to_string()))?;
        Ok(())
    }

    async fn nack(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> MessagingResult<()> {
        self.check_open()?;
        let message_id = Self::receipt_id(receipt_handle)?;
        if requeue {
            // The visibility timeout returns the message to the queue
            return Ok(());
        }
        self.pgmq
            .archive(queue_name, message_id)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "archive", e.to_string()))?;
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> MessagingResult<QueueStats> {
        self.check_open()?;
        let row = sqlx::query("SELECT queue_length, total_messages FROM pgmq.metrics($1)")
            .bind(queue_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "metrics", e.to_string()))?;

        let mut stats = QueueStats::new(queue_name);
        match row {
            Some(row) => {
                let queue_length: i64 = row.try_get("queue_length").unwrap_or(0);
                let total_messages: i64 = row.try_get("total_messages").unwrap_or(0);
                stats.pending_count = queue_length.max(0) as u64;
                stats.total_sent = total_messages.max(0) as u64;
            }
            None => warn!(queue = %queue_name, "pgmq reported no metrics for queue"),
        }
        Ok(stats)
    }

    async fn close(&self) -> MessagingResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(MessagingError::connection_closed(&self.address));
        }
        self.pool.close().await;
        info!(broker = %self.address, "pgmq connection pool closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
