//! # Queue Dispatcher
//!
//! Turns one inbound message into side effects:
//!
//! ```text
//! Received -> Decided -> {Executing order i}* -> Done
//!     |           |
//!     |           +-> decision failed (whole message aborted)
//!     +-> discarded (malformed body, never retried)
//! ```
//!
//! Orders run strictly in batch order, each inside the isolated step runner,
//! so a failing order is logged and the next one still runs. Only malformed
//! input and a failing decision function stop a message early; in both cases
//! there is no batch to execute.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::conveyor::ConveyorBelt;
use super::decision::{DecisionError, DecisionFunction};
use super::isolation::{IsolatedStepRunner, StepReport};
use crate::config::DispatcherConfig;
use crate::constants::events;
use crate::logging::{log_error, log_message_operation, log_order_operation};
use crate::messaging::{MessageId, MessagingError, MessagingGateway};
use crate::models::{Message, Order, OrderType};
use crate::registry::{
    Indexer, NotificationSummary, PluginError, PluginKind, PluginRegistry, RegistryError,
    SubscriberRegistry,
};
use crate::storage::{ObjectStore, StorageError};

/// Why a single order did not complete
#[derive(Error, Debug)]
pub enum OrderError {
    #[error("{order_type} order has no object id")]
    MissingObjectId { order_type: OrderType },

    #[error("{order_type} order has no target")]
    MissingTarget { order_type: OrderType },

    #[error("Index order for '{oid}' has no target and no default indexer is configured")]
    NoIndexer { oid: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Dispatch to '{queue}' on '{broker}' failed: {source}")]
    Dispatch {
        broker: String,
        queue: String,
        #[source]
        source: MessagingError,
    },
}

/// What a completed order did
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEffect {
    Transformed {
        oid: String,
        transformers_run: usize,
    },
    Indexed {
        oid: String,
        committed: bool,
    },
    Notified {
        delivered: usize,
        failed: usize,
    },
    Dispatched {
        oid: String,
        broker: String,
        queue: String,
        message_id: MessageId,
    },
}

/// Terminal state of one message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Malformed input, dropped without retry
    Discarded { reason: String },
    /// The decision function failed; nothing ran
    DecisionFailed { oid: String, error: String },
    /// Every order was attempted; per-order failures are in the report
    Completed { oid: String, report: StepReport },
}

impl MessageOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Collaborators the dispatcher executes orders against
#[derive(Clone)]
pub struct DispatcherContext {
    pub registry: Arc<PluginRegistry>,
    pub store: Arc<dyn ObjectStore>,
    pub conveyor: Arc<ConveyorBelt>,
    pub subscribers: Arc<SubscriberRegistry>,
    pub indexer: Option<Arc<dyn Indexer>>,
    pub gateway: MessagingGateway,
}

pub struct QueueDispatcher {
    listen_queue: String,
    default_broker: String,
    decision: Arc<dyn DecisionFunction>,
    context: DispatcherContext,
    config: DispatcherConfig,
}

impl QueueDispatcher {
    pub fn new(
        listen_queue: impl Into<String>,
        default_broker: impl Into<String>,
        decision: Arc<dyn DecisionFunction>,
        context: DispatcherContext,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            listen_queue: listen_queue.into(),
            default_broker: default_broker.into(),
            decision,
            context,
            config,
        }
    }

    pub fn listen_queue(&self) -> &str {
        &self.listen_queue
    }

    pub fn default_broker(&self) -> &str {
        &self.default_broker
    }

    /// Handle a raw queue body received on `queue`
    pub async fn on_message(&self, raw: &[u8], queue: &str) -> MessageOutcome {
        match Message::parse(raw) {
            Ok(message) => self.process(message, queue).await,
            Err(e) => {
                let reason = e.to_string();
                log_message_operation("discard", queue, None, "malformed", Some(&reason));
                self.lifecycle_event(events::MESSAGE_DISCARDED, queue, None, [("reason", reason.clone())]);
                MessageOutcome::Discarded { reason }
            }
        }
    }

    /// Decide and execute the batch for an already-parsed message
    #[instrument(skip(self, message), fields(oid = %message.oid, queue = %queue))]
    pub async fn process(&self, message: Message, queue: &str) -> MessageOutcome {
        log_message_operation("receive", queue, Some(&message.oid), "received", None);

        let batch = match self.decision.evaluate(&message).await {
            Ok(batch) => batch,
            Err(e) => return self.decision_failed(&message, queue, e),
        };

        log_message_operation(
            "decide",
            queue,
            Some(&message.oid),
            "decided",
            Some(&format!("{} orders from {}", batch.len(), self.decision.name())),
        );

        let mut runner = IsolatedStepRunner::new("dispatcher");
        for (index, order) in batch.iter().enumerate() {
            let label = format!("{}#{}", order.order_type, index);
            match runner.run(label, self.execute_order(&message, order)).await {
                Some(effect) => {
                    log_order_operation(
                        index,
                        order.order_type.wire_name(),
                        order.oid(),
                        order.target(),
                        "completed",
                        Some(&format!("{effect:?}")),
                    );
                }
                None => {
                    let error = runner
                        .report()
                        .failures
                        .last()
                        .map(|failure| failure.error.clone())
                        .unwrap_or_default();
                    log_order_operation(
                        index,
                        order.order_type.wire_name(),
                        order.oid(),
                        order.target(),
                        "failed",
                        Some(&error),
                    );
                    self.lifecycle_event(
                        events::ORDER_FAILED,
                        queue,
                        Some(&message.oid),
                        [
                            ("order_index", index.to_string()),
                            ("order_type", order.order_type.wire_name().to_string()),
                            ("error", error),
                        ],
                    );
                }
            }
        }

        let report = runner.finish();
        log_message_operation(
            "complete",
            queue,
            Some(&message.oid),
            "done",
            Some(&format!(
                "{} orders, {} failed",
                report.attempted,
                report.failed()
            )),
        );
        self.lifecycle_event(
            events::MESSAGE_COMPLETED,
            queue,
            Some(&message.oid),
            [
                ("orders", report.attempted.to_string()),
                ("failed", report.failed().to_string()),
            ],
        );

        MessageOutcome::Completed {
            oid: message.oid,
            report,
        }
    }

    fn decision_failed(&self, message: &Message, queue: &str, error: DecisionError) -> MessageOutcome {
        let error = error.to_string();
        log_error(
            "dispatcher",
            "evaluate",
            &error,
            Some(&format!("oid={} queue={}", message.oid, queue)),
        );
        self.lifecycle_event(
            events::DECISION_FAILED,
            queue,
            Some(&message.oid),
            [("error", error.clone())],
        );
        MessageOutcome::DecisionFailed {
            oid: message.oid.clone(),
            error,
        }
    }

    /// Execute one order; errors are absorbed by the caller's step runner
    pub async fn execute_order(
        &self,
        origin: &Message,
        order: &Order,
    ) -> Result<OrderEffect, OrderError> {
        match order.order_type {
            OrderType::Transform => self.execute_transform(order).await,
            OrderType::Index => self.execute_index(order).await,
            OrderType::Notify => self.execute_notify(order).await,
            OrderType::Dispatch => self.execute_dispatch(origin, order).await,
        }
    }

    fn required_oid(order: &Order) -> Result<&str, OrderError> {
        order.subject_oid().ok_or(OrderError::MissingObjectId {
            order_type: order.order_type,
        })
    }

    /// A target naming a conveyor stage runs the whole chain; anything else is
    /// a single transformer resolved from the registry
    ///
    /// A stage is configured, or carried by the object as its own override.
    /// A registered transformer wins over an unconfigured stage of the same
    /// name.
    async fn execute_transform(&self, order: &Order) -> Result<OrderEffect, OrderError> {
        let oid = Self::required_oid(order)?;
        let target = order.target().ok_or(OrderError::MissingTarget {
            order_type: order.order_type,
        })?;

        let conveyor = &self.context.conveyor;
        if conveyor.is_stage(target)
            || !self.context.registry.contains(PluginKind::Transformer, target)
        {
            let object = self.context.store.get_object(oid).await?;
            if !conveyor.handles_stage(target, &object) {
                return Err(RegistryError::not_found(PluginKind::Transformer, target).into());
            }
            let outcome = conveyor.run(object, target, &order.config).await;
            self.context.store.save_object(&outcome.object).await?;
            return Ok(OrderEffect::Transformed {
                oid: outcome.object.id,
                transformers_run: outcome.report.succeeded,
            });
        }

        let transformer = self.context.registry.transformer(target)?;
        transformer
            .init(&self.config.plugin_init_config(target))
            .await?;

        let result = async {
            let object = self.context.store.get_object(oid).await?;
            let object = transformer.transform(object, &order.config).await?;
            self.context.store.save_object(&object).await?;
            Ok::<_, OrderError>(object)
        }
        .await;

        if let Err(e) = transformer.shutdown().await {
            warn!(transformer_id = %target, error = %e, "Transformer shutdown failed");
        }

        let object = result?;
        Ok(OrderEffect::Transformed {
            oid: object.id,
            transformers_run: 1,
        })
    }

    async fn execute_index(&self, order: &Order) -> Result<OrderEffect, OrderError> {
        let oid = Self::required_oid(order)?;
        let committed = order.wants_commit();

        match order.target() {
            Some(indexer_id) => {
                let indexer = self.context.registry.indexer(indexer_id)?;
                indexer
                    .init(&self.config.plugin_init_config(indexer_id))
                    .await?;
                let result = Self::index_with(indexer.as_ref(), oid, committed).await;
                if let Err(e) = indexer.shutdown().await {
                    warn!(indexer_id = %indexer_id, error = %e, "Indexer shutdown failed");
                }
                result?;
            }
            None => {
                let indexer = self
                    .context
                    .indexer
                    .as_ref()
                    .ok_or_else(|| OrderError::NoIndexer {
                        oid: oid.to_string(),
                    })?;
                Self::index_with(indexer.as_ref(), oid, committed).await?;
            }
        }

        Ok(OrderEffect::Indexed {
            oid: oid.to_string(),
            committed,
        })
    }

    async fn index_with(indexer: &dyn Indexer, oid: &str, commit: bool) -> Result<(), PluginError> {
        indexer.index(oid).await?;
        if commit {
            indexer.commit().await?;
        }
        Ok(())
    }

    /// Fan the payload out to every subscriber and to event listeners
    async fn execute_notify(&self, order: &Order) -> Result<OrderEffect, OrderError> {
        let oid = Self::required_oid(order)?;
        let fields = notification_fields(&order.payload, oid);

        let NotificationSummary { delivered, failed } =
            self.context.subscribers.notify_all(&fields).await;
        self.context
            .gateway
            .publish_event(fields.into_iter().collect());

        Ok(OrderEffect::Notified {
            delivered,
            failed: failed.len(),
        })
    }

    /// Send a brand-new message, by default to this dispatcher's own queue on
    /// the default broker
    async fn execute_dispatch(&self, origin: &Message, order: &Order) -> Result<OrderEffect, OrderError> {
        let message = Message::from_payload(&order.payload, &origin.oid);
        let queue = order.target().unwrap_or(self.listen_queue.as_str());
        let broker = order
            .broker_override
            .as_deref()
            .filter(|broker| !broker.trim().is_empty())
            .unwrap_or(self.default_broker.as_str());

        debug!(
            from = %origin.oid,
            oid = %message.oid,
            broker = %broker,
            queue = %queue,
            "Dispatching cascaded message"
        );

        let message_id = self
            .context
            .gateway
            .send_to_queue(broker, queue, &message.to_value())
            .await
            .map_err(|source| OrderError::Dispatch {
                broker: broker.to_string(),
                queue: queue.to_string(),
                source,
            })?;

        Ok(OrderEffect::Dispatched {
            oid: message.oid,
            broker: broker.to_string(),
            queue: queue.to_string(),
            message_id,
        })
    }

    fn lifecycle_event<const N: usize>(
        &self,
        event: &str,
        queue: &str,
        oid: Option<&str>,
        extra: [(&str, String); N],
    ) {
        if !self.config.publish_lifecycle_events {
            return;
        }

        let mut fields: HashMap<String, String> = extra
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        fields.insert("event".to_string(), event.to_string());
        fields.insert("queue".to_string(), queue.to_string());
        if let Some(oid) = oid {
            fields.insert("oid".to_string(), oid.to_string());
        }

        let listeners = self.context.gateway.publish_event(fields);
        if listeners == 0 {
            debug!(event = %event, "No listeners for lifecycle event");
        } else {
            info!(event = %event, listeners, "Lifecycle event published");
        }
    }
}

impl std::fmt::Debug for QueueDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueDispatcher")
            .field("listen_queue", &self.listen_queue)
            .field("default_broker", &self.default_broker)
            .field("decision", &self.decision.name())
            .finish()
    }
}

/// Flatten a notify payload to string fields and add `oid` when absent
///
/// Strings are taken verbatim; every other JSON value is rendered as JSON
/// text. A non-object payload lands under `payload`.
pub fn notification_fields(payload: &Value, oid: &str) -> BTreeMap<String, String> {
    let render = |value: &Value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut fields: BTreeMap<String, String> = match payload {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| (key.clone(), render(value)))
            .collect(),
        Value::Null => BTreeMap::new(),
        other => BTreeMap::from([("payload".to_string(), render(other))]),
    };
    fields
        .entry("oid".to_string())
        .or_insert_with(|| oid.to_string());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_fields_flatten() {
        let fields = notification_fields(
            &json!({"eventType": "modify", "count": 3, "tags": ["a"], "ok": true}),
            "uuid:1",
        );
        assert_eq!(fields["eventType"], "modify");
        assert_eq!(fields["count"], "3");
        assert_eq!(fields["tags"], "[\"a\"]");
        assert_eq!(fields["ok"], "true");
        assert_eq!(fields["oid"], "uuid:1");
    }

    #[test]
    fn test_notification_fields_keep_explicit_oid() {
        let fields = notification_fields(&json!({"oid": "uuid:other"}), "uuid:1");
        assert_eq!(fields["oid"], "uuid:other");

        let fields = notification_fields(&json!("bare"), "uuid:1");
        assert_eq!(fields["payload"], "bare");
        assert_eq!(fields.len(), 2);
    }
}
