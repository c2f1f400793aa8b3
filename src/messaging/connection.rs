//! # Broker Connection Traits
//!
//! Provider-agnostic contracts for talking to a message broker. A
//! `BrokerConnector` opens sessions; a `BrokerConnection` is one open session
//! addressed by the exact address string it was opened with.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use super::types::{DeliveryMode, MessageId, QueueStats, ReceiptHandle, ReceivedMessage};
use super::MessagingResult;

/// One open broker session
///
/// Implementations create destination handles lazily: sending to or receiving
/// from a queue that has not been seen on this connection creates (or looks
/// up) the destination and reuses it afterwards.
#[async_trait]
pub trait BrokerConnection: Send + Sync + Debug {
    /// The address string this connection was opened with
    fn address(&self) -> &str;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;

    /// Create the queue if it does not exist yet (idempotent)
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()>;

    /// Hand a serialized body to the broker
    async fn send(
        &self,
        queue_name: &str,
        body: &[u8],
        mode: DeliveryMode,
    ) -> MessagingResult<MessageId>;

    /// Wait up to `wait` for the next message on the queue
    ///
    /// Returns `Ok(None)` when nothing arrived in time. A received message is
    /// in flight until it is acked or nacked.
    async fn receive(
        &self,
        queue_name: &str,
        wait: Duration,
    ) -> MessagingResult<Option<ReceivedMessage>>;

    /// Acknowledge successful handling; the message is gone for good
    async fn ack(&self, queue_name: &str, receipt_handle: &ReceiptHandle) -> MessagingResult<()>;

    /// Negative acknowledge: back onto the queue, or dead-lettered when
    /// `requeue` is false
    async fn nack(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> MessagingResult<()>;

    async fn queue_stats(&self, queue_name: &str) -> MessagingResult<QueueStats>;

    /// Close the session; later operations fail with `ConnectionClosed`
    async fn close(&self) -> MessagingResult<()>;

    fn is_closed(&self) -> bool;
}

/// Opens broker sessions for address strings
#[async_trait]
pub trait BrokerConnector: Send + Sync + Debug {
    async fn connect(&self, address: &str) -> MessagingResult<Arc<dyn BrokerConnection>>;

    fn provider_name(&self) -> &'static str;
}
