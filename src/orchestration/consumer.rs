//! # Queue Consumer
//!
//! One tokio task per consumed queue. Each task receives a body, hands it to
//! the dispatcher and awaits the whole batch before receiving the next one,
//! so messages on one queue are handled strictly one at a time. Different
//! queues run concurrently.
//!
//! Acknowledgement policy:
//! - processed or discarded as malformed: ack
//! - decision function failed: nack without requeue (dead-letter)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dispatcher::{MessageOutcome, QueueDispatcher};
use crate::messaging::{BrokerConnection, ReceivedMessage};

/// Running counters for one consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    redelivered: AtomicU64,
    completed: AtomicU64,
    discarded: AtomicU64,
    dead_lettered: AtomicU64,
    receive_errors: AtomicU64,
    ack_errors: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub queue: String,
    pub received: u64,
    pub redelivered: u64,
    pub completed: u64,
    pub discarded: u64,
    pub dead_lettered: u64,
    pub receive_errors: u64,
    pub ack_errors: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self, queue: &str) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            queue: queue.to_string(),
            received: self.received.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            ack_errors: self.ack_errors.load(Ordering::Relaxed),
        }
    }

    /// Messages that reached a terminal outcome
    pub fn handled(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
            + self.discarded.load(Ordering::Relaxed)
            + self.dead_lettered.load(Ordering::Relaxed)
    }
}

pub struct QueueConsumer {
    queue: String,
    connection: Arc<dyn BrokerConnection>,
    dispatcher: Arc<QueueDispatcher>,
    stats: Arc<ConsumerStats>,
    receive_wait: Duration,
    error_backoff: Duration,
}

impl QueueConsumer {
    pub fn new(
        queue: impl Into<String>,
        connection: Arc<dyn BrokerConnection>,
        dispatcher: Arc<QueueDispatcher>,
        receive_wait: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            queue: queue.into(),
            connection,
            dispatcher,
            stats: Arc::new(ConsumerStats::default()),
            receive_wait,
            error_backoff,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    /// Start the receive loop on its own task
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> ConsumerHandle {
        let queue = self.queue.clone();
        let stats = self.stats.clone();
        let join = tokio::spawn(self.run(shutdown));
        ConsumerHandle { queue, stats, join }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.queue,
            broker = %self.connection.address(),
            "✅ CONSUMER: Listening"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = self.connection.receive(&self.queue, self.receive_wait) => result,
            };

            match received {
                Ok(Some(message)) => {
                    // In-flight messages finish even when shutdown is requested
                    self.handle(message).await;
                }
                Ok(None) => {}
                Err(e) => {
                    self.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                    error!(
                        queue = %self.queue,
                        error = %e,
                        backoff_ms = self.error_backoff.as_millis() as u64,
                        "❌ CONSUMER: Receive failed"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(self.error_backoff) => {},
                        _ = shutdown.changed() => {
                            debug!(queue = %self.queue, "Shutdown requested during receive backoff");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            queue = %self.queue,
            handled = self.stats.handled(),
            "🛑 CONSUMER: Stopped"
        );
    }

    /// Dispatch one received body and settle it with the broker
    pub async fn handle(&self, message: ReceivedMessage) -> MessageOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        if message.is_redelivery() {
            self.stats.redelivered.fetch_add(1, Ordering::Relaxed);
            debug!(
                queue = %self.queue,
                message_id = %message.id,
                receive_count = message.receive_count,
                "Redelivered message, processing again"
            );
        }

        let outcome = self.dispatcher.on_message(&message.body, &self.queue).await;

        let (settled, counter) = match &outcome {
            MessageOutcome::Completed { .. } => (
                self.connection
                    .ack(&self.queue, &message.receipt_handle)
                    .await,
                &self.stats.completed,
            ),
            MessageOutcome::Discarded { .. } => (
                self.connection
                    .ack(&self.queue, &message.receipt_handle)
                    .await,
                &self.stats.discarded,
            ),
            MessageOutcome::DecisionFailed { .. } => (
                self.connection
                    .nack(&self.queue, &message.receipt_handle, false)
                    .await,
                &self.stats.dead_lettered,
            ),
        };
        // Count only after settling with the broker
        counter.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = settled {
            self.stats.ack_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                queue = %self.queue,
                message_id = %message.id,
                error = %e,
                "Failed to settle message with broker; it may be redelivered"
            );
        }

        outcome
    }
}

impl std::fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("queue", &self.queue)
            .field("broker", &self.connection.address())
            .finish()
    }
}

/// A running consumer task
#[derive(Debug)]
pub struct ConsumerHandle {
    queue: String,
    stats: Arc<ConsumerStats>,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot(&self.queue)
    }

    /// Live counters, still readable after the handle is joined
    pub fn counters(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task to end; `false` if it panicked or was aborted
    pub async fn join(self) -> bool {
        match self.join.await {
            Ok(()) => true,
            Err(e) => {
                error!(queue = %self.queue, error = %e, "Consumer task ended abnormally");
                false
            }
        }
    }
}
