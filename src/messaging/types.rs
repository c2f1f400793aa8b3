//! # Messaging Types
//!
//! Identifiers, received-message envelopes and queue statistics shared by all
//! broker providers.

use chrono::{DateTime, Utc};
use std::fmt;

/// Provider-assigned identifier for a sent message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Handle for acknowledging a received message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ReceiptHandle {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for ReceiptHandle {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// How the broker should treat a sent message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Survives broker restarts
    #[default]
    Persistent,
    NonPersistent,
}

/// A raw message body received from a queue
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub queue_name: String,
    pub body: Vec<u8>,
    /// How many times this body has been delivered (1 on first delivery)
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl ReceivedMessage {
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// Point-in-time statistics for one queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queue_name: String,
    /// Messages waiting to be received
    pub pending_count: u64,
    /// Messages received but not yet acknowledged
    pub in_flight_count: u64,
    /// Messages nacked without requeue
    pub dead_letter_count: u64,
    pub total_sent: u64,
    pub total_received: u64,
    pub total_acked: u64,
}

impl QueueStats {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Default::default()
        }
    }
}
