use std::collections::BTreeMap;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Fan-out publisher for audit and lifecycle events
///
/// Publishing never blocks and never fails for lack of listeners; slow
/// listeners that fall more than `capacity` events behind miss the oldest.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    /// Unique per publish; listeners receiving the same event see the same id
    pub event_id: Uuid,
    pub fields: BTreeMap<String, String>,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl PublishedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a field map to every current listener
    ///
    /// Returns how many listeners the event was handed to.
    pub fn publish<I, K, V>(&self, fields: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let event = PublishedEvent {
            event_id: Uuid::new_v4(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            published_at: chrono::Utc::now(),
        };

        // No listeners is fine: events are fire-and-forget
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active listeners
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
