//! # Subscriber Registry
//!
//! Live subscriber instances that receive `Notify` Orders. Delivery goes to
//! every active subscriber in registration order; one failing subscriber is
//! logged and counted and never stops the rest.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::plugin::Subscriber;
use super::plugin_registry::{PluginKind, RegistryError, RegistryResult};

/// Subscription information
#[derive(Clone)]
pub struct Subscription {
    pub subscriber_id: String,
    pub subscriber: Arc<dyn Subscriber>,
    pub active: bool,
    pub events_received: u64,
    pub failures: u64,
    pub last_event_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subscriber_id", &self.subscriber_id)
            .field("subscriber", &"<Arc<dyn Subscriber>>".to_string())
            .field("active", &self.active)
            .field("events_received", &self.events_received)
            .field("failures", &self.failures)
            .field("last_event_at", &self.last_event_at)
            .finish()
    }
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationSummary {
    pub delivered: usize,
    /// (subscriber id, error message) per failed delivery
    pub failed: Vec<(String, String)>,
}

impl NotificationSummary {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }

    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    /// Registration order is delivery order
    subscriptions: RwLock<Vec<Subscription>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber under its own plugin id
    pub async fn register(&self, subscriber: Arc<dyn Subscriber>) -> RegistryResult<()> {
        let subscriber_id = subscriber.id().to_string();
        let mut subscriptions = self.subscriptions.write().await;

        if subscriptions
            .iter()
            .any(|s| s.subscriber_id == subscriber_id)
        {
            return Err(RegistryError::duplicate(
                PluginKind::Subscriber,
                subscriber_id,
            ));
        }

        subscriptions.push(Subscription {
            subscriber_id: subscriber_id.clone(),
            subscriber,
            active: true,
            events_received: 0,
            failures: 0,
            last_event_at: None,
        });

        info!(subscriber_id = %subscriber_id, "Registered subscriber");
        Ok(())
    }

    /// Remove a subscriber; the caller owns its shutdown
    pub async fn unregister(&self, subscriber_id: &str) -> RegistryResult<Arc<dyn Subscriber>> {
        let mut subscriptions = self.subscriptions.write().await;
        let position = subscriptions
            .iter()
            .position(|s| s.subscriber_id == subscriber_id)
            .ok_or_else(|| RegistryError::not_found(PluginKind::Subscriber, subscriber_id))?;

        let subscription = subscriptions.remove(position);
        info!(subscriber_id = %subscriber_id, "Unregistered subscriber");
        Ok(subscription.subscriber)
    }

    /// Deliver `fields` to every active subscriber
    pub async fn notify_all(&self, fields: &BTreeMap<String, String>) -> NotificationSummary {
        // Snapshot so no lock is held across plugin calls
        let targets: Vec<(String, Arc<dyn Subscriber>)> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .iter()
                .filter(|s| s.active)
                .map(|s| (s.subscriber_id.clone(), s.subscriber.clone()))
                .collect()
        };

        if targets.is_empty() {
            debug!("No active subscribers to notify");
            return NotificationSummary::default();
        }

        let mut summary = NotificationSummary::default();
        let mut outcomes = Vec::with_capacity(targets.len());
        for (subscriber_id, subscriber) in targets {
            match subscriber.notify(fields).await {
                Ok(()) => {
                    summary.delivered += 1;
                    outcomes.push((subscriber_id, true));
                }
                Err(e) => {
                    error!(
                        subscriber_id = %subscriber_id,
                        error = %e,
                        "Subscriber failed to handle notification"
                    );
                    summary.failed.push((subscriber_id.clone(), e.to_string()));
                    outcomes.push((subscriber_id, false));
                }
            }
        }

        self.record(outcomes).await;
        summary
    }

    async fn record(&self, outcomes: Vec<(String, bool)>) {
        let now = chrono::Utc::now();
        let mut subscriptions = self.subscriptions.write().await;
        for (subscriber_id, delivered) in outcomes {
            // May have been unregistered while notifying
            if let Some(subscription) = subscriptions
                .iter_mut()
                .find(|s| s.subscriber_id == subscriber_id)
            {
                subscription.events_received += 1;
                subscription.last_event_at = Some(now);
                if !delivered {
                    subscription.failures += 1;
                }
            }
        }
    }

    /// Shut every subscriber down and mark it inactive
    ///
    /// Each shutdown is attempted even if an earlier one failed. Returns the
    /// number that shut down cleanly.
    pub async fn shutdown_all(&self) -> usize {
        let targets: Vec<(String, Arc<dyn Subscriber>)> = {
            let mut subscriptions = self.subscriptions.write().await;
            subscriptions
                .iter_mut()
                .filter(|s| s.active)
                .map(|s| {
                    s.active = false;
                    (s.subscriber_id.clone(), s.subscriber.clone())
                })
                .collect()
        };

        let mut clean = 0;
        for (subscriber_id, subscriber) in targets {
            match subscriber.shutdown().await {
                Ok(()) => clean += 1,
                Err(e) => warn!(
                    subscriber_id = %subscriber_id,
                    error = %e,
                    "Subscriber shutdown failed"
                ),
            }
        }
        clean
    }

    pub async fn subscriber_ids(&self) -> Vec<String> {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .iter()
            .map(|s| s.subscriber_id.clone())
            .collect()
    }

    pub async fn get_stats(&self) -> SubscriberStats {
        let subscriptions = self.subscriptions.read().await;

        let mut stats = SubscriberStats {
            total_subscribers: subscriptions.len(),
            ..Default::default()
        };

        for subscription in subscriptions.iter() {
            if subscription.active {
                stats.active_subscribers += 1;
            }
            stats.total_events_processed += subscription.events_received;
            stats.total_failures += subscription.failures;

            stats.subscriber_details.push(SubscriberDetail {
                subscriber_id: subscription.subscriber_id.clone(),
                active: subscription.active,
                events_received: subscription.events_received,
                failures: subscription.failures,
                last_event_at: subscription.last_event_at,
            });
        }

        stats
    }
}

/// Statistics about subscriptions
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriberStats {
    pub total_subscribers: usize,
    pub active_subscribers: usize,
    pub total_events_processed: u64,
    pub total_failures: u64,
    pub subscriber_details: Vec<SubscriberDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriberDetail {
    pub subscriber_id: String,
    pub active: bool,
    pub events_received: u64,
    pub failures: u64,
    pub last_event_at: Option<chrono::DateTime<chrono::Utc>>,
}
