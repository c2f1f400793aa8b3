//! # Messaging Gateway
//!
//! The send/notify surface every other component uses: JSON to a named queue
//! on a named broker, and fire-and-forget events to in-process listeners.
//! Both only guarantee hand-off, not downstream processing.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error};

use super::registry::BrokerConnectionRegistry;
use super::types::{DeliveryMode, MessageId};
use super::MessagingResult;
use crate::events::{EventPublisher, PublishedEvent};

#[derive(Debug, Clone)]
pub struct MessagingGateway {
    connections: Arc<BrokerConnectionRegistry>,
    events: EventPublisher,
}

impl MessagingGateway {
    pub fn new(connections: Arc<BrokerConnectionRegistry>, events: EventPublisher) -> Self {
        Self {
            connections,
            events,
        }
    }

    /// Send a JSON payload as a persistent message to `queue_id` on the broker
    /// at `broker_address`
    ///
    /// Broker failures propagate to the caller.
    pub async fn send_to_queue(
        &self,
        broker_address: &str,
        queue_id: &str,
        payload: &Value,
    ) -> MessagingResult<MessageId> {
        let body = serde_json::to_vec(payload)?;

        let result = async {
            let connection = self.connections.get_connection(broker_address).await?;
            connection
                .send(queue_id, &body, DeliveryMode::Persistent)
                .await
        }
        .await;

        match &result {
            Ok(message_id) => debug!(
                broker = %broker_address,
                queue = %queue_id,
                message_id = %message_id,
                "Message handed to broker"
            ),
            Err(e) => error!(
                broker = %broker_address,
                queue = %queue_id,
                error = %e,
                "Failed to send message"
            ),
        }
        result
    }

    /// Notify every registered listener; returns how many received it
    pub fn publish_event(&self, fields: HashMap<String, String>) -> usize {
        self.events.publish(fields)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PublishedEvent> {
        self.events.subscribe()
    }

    pub fn connections(&self) -> &Arc<BrokerConnectionRegistry> {
        &self.connections
    }
}
