//! # Curation Engine
//!
//! Wires the collaborators together and owns the consumer tasks.
//!
//! Bootstrap order:
//! 1. validate configuration
//! 2. event publisher, connection registry, messaging gateway
//! 3. conveyor belt (pre-warms the transformer pool)
//! 4. default indexer and subscriber fan-out
//! 5. connect to the default broker, declare every consumed queue
//! 6. one consumer task per queue
//!
//! Shutdown runs the same steps backwards. Every step is attempted even when
//! an earlier one fails.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::consumer::{ConsumerHandle, ConsumerStatsSnapshot, QueueConsumer};
use super::conveyor::ConveyorBelt;
use super::decision::DecisionFunction;
use super::dispatcher::{DispatcherContext, QueueDispatcher};
use crate::config::CuratorConfig;
use crate::error::{CuratorError, Result};
use crate::events::EventPublisher;
use crate::messaging::{
    BrokerConnectionRegistry, BrokerConnector, MessageId, MessagingGateway,
};
use crate::models::Message;
use crate::registry::{Indexer, PluginRegistry, SubscriberRegistry};
use crate::storage::ObjectStore;

/// What `shutdown` managed to stop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub consumers_stopped: usize,
    pub consumers_failed: usize,
    pub connections_closed: usize,
    pub transformers_shut_down: usize,
    pub indexer_shut_down: bool,
    pub subscribers_shut_down: usize,
    /// Final per-queue counters
    pub consumer_stats: Vec<ConsumerStatsSnapshot>,
}

pub struct CurationEngine {
    config: CuratorConfig,
    registry: Arc<PluginRegistry>,
    dispatcher: Arc<QueueDispatcher>,
    conveyor: Arc<ConveyorBelt>,
    subscribers: Arc<SubscriberRegistry>,
    indexer: Option<Arc<dyn Indexer>>,
    gateway: MessagingGateway,
    shutdown_tx: watch::Sender<bool>,
    consumers: Mutex<Vec<ConsumerHandle>>,
}

impl CurationEngine {
    /// Build every component and start consuming
    ///
    /// Fails on invalid configuration or when the default broker cannot be
    /// reached. Plugins that cannot be resolved or initialised are logged and
    /// left out; orders that need them fail individually later.
    #[instrument(skip_all, fields(listen_queue = %config.broker.listen_queue))]
    pub async fn bootstrap(
        config: CuratorConfig,
        registry: Arc<PluginRegistry>,
        store: Arc<dyn ObjectStore>,
        decision: Arc<dyn DecisionFunction>,
        connector: Arc<dyn BrokerConnector>,
    ) -> Result<Self> {
        info!(
            provider = connector.provider_name(),
            decision = decision.name(),
            "🚀 ENGINE: Starting curation engine bootstrap"
        );
        config.validate()?;

        let events = EventPublisher::new(config.events.channel_capacity);
        let connections = Arc::new(BrokerConnectionRegistry::new(connector));
        let gateway = MessagingGateway::new(connections.clone(), events);

        let conveyor = Arc::new(ConveyorBelt::warm(config.conveyor.clone(), &registry).await);
        for (stage, transformer_id) in config.unpooled_chain_entries() {
            warn!(
                stage = %stage,
                transformer_id = %transformer_id,
                "Stage chain names a transformer with no transformer_defaults entry; it will be skipped"
            );
        }

        let indexer = Self::start_indexer(&config, &registry).await;
        let subscribers = Arc::new(Self::start_subscribers(&config, &registry).await);

        let dispatcher = Arc::new(QueueDispatcher::new(
            config.broker.listen_queue.clone(),
            config.broker.default_address.clone(),
            decision,
            DispatcherContext {
                registry: registry.clone(),
                store,
                conveyor: conveyor.clone(),
                subscribers: subscribers.clone(),
                indexer: indexer.clone(),
                gateway: gateway.clone(),
            },
            config.dispatcher.clone(),
        ));

        let connection = connections
            .get_connection(&config.broker.default_address)
            .await?;
        let queues = config.broker.consumed_queues();
        for queue in &queues {
            connection.ensure_queue(queue).await?;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut consumers = Vec::new();
        for queue in queues {
            let consumer = QueueConsumer::new(
                queue,
                connection.clone(),
                dispatcher.clone(),
                config.broker.receive_wait(),
                config.broker.receive_error_backoff(),
            );
            consumers.push(consumer.spawn(shutdown_rx.clone()));
        }

        info!(
            broker = %crate::config::ConfigManager::sanitize_address(&config.broker.default_address),
            queues = consumers.len(),
            pooled_transformers = conveyor.pooled_ids().len(),
            has_indexer = indexer.is_some(),
            "🎉 ENGINE: Curation engine running"
        );

        Ok(Self {
            config,
            registry,
            dispatcher,
            conveyor,
            subscribers,
            indexer,
            gateway,
            shutdown_tx,
            consumers: Mutex::new(consumers),
        })
    }

    async fn start_indexer(
        config: &CuratorConfig,
        registry: &PluginRegistry,
    ) -> Option<Arc<dyn Indexer>> {
        let indexer_id = config.dispatcher.indexer.as_deref()?;
        let indexer = match registry.indexer(indexer_id) {
            Ok(indexer) => indexer,
            Err(e) => {
                error!(indexer_id = %indexer_id, error = %e, "❌ ENGINE: Cannot resolve default indexer");
                return None;
            }
        };

        match indexer
            .init(&config.dispatcher.plugin_init_config(indexer_id))
            .await
        {
            Ok(()) => Some(indexer),
            Err(e) => {
                error!(indexer_id = %indexer_id, error = %e, "❌ ENGINE: Default indexer failed to initialize");
                None
            }
        }
    }

    async fn start_subscribers(config: &CuratorConfig, registry: &PluginRegistry) -> SubscriberRegistry {
        let subscribers = SubscriberRegistry::new();
        for subscriber_id in &config.dispatcher.subscribers {
            let subscriber = match registry.subscriber(subscriber_id) {
                Ok(subscriber) => subscriber,
                Err(e) => {
                    error!(subscriber_id = %subscriber_id, error = %e, "❌ ENGINE: Cannot resolve subscriber");
                    continue;
                }
            };
            if let Err(e) = subscriber
                .init(&config.dispatcher.plugin_init_config(subscriber_id))
                .await
            {
                error!(subscriber_id = %subscriber_id, error = %e, "❌ ENGINE: Subscriber failed to initialize");
                continue;
            }
            if let Err(e) = subscribers.register(subscriber).await {
                warn!(subscriber_id = %subscriber_id, error = %e, "Subscriber listed twice, keeping the first");
            }
        }
        subscribers
    }

    /// Send `message` to this engine's own queue on the default broker
    ///
    /// Refused once shutdown has begun.
    pub async fn submit(&self, message: &Message) -> Result<MessageId> {
        if *self.shutdown_tx.borrow() {
            return Err(CuratorError::engine(format!(
                "engine is shut down, not submitting '{}'",
                message.oid
            )));
        }

        let message_id = self
            .gateway
            .send_to_queue(
                &self.config.broker.default_address,
                &self.config.broker.listen_queue,
                &message.to_value(),
            )
            .await?;
        Ok(message_id)
    }

    pub fn config(&self) -> &CuratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<QueueDispatcher> {
        &self.dispatcher
    }

    pub fn conveyor(&self) -> &Arc<ConveyorBelt> {
        &self.conveyor
    }

    pub fn subscribers(&self) -> &Arc<SubscriberRegistry> {
        &self.subscribers
    }

    pub fn gateway(&self) -> &MessagingGateway {
        &self.gateway
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown_tx.borrow() && !self.consumers.lock().is_empty()
    }

    /// Queues with a live consumer, in start order
    pub fn queues(&self) -> Vec<String> {
        self.consumers
            .lock()
            .iter()
            .map(|consumer| consumer.queue().to_string())
            .collect()
    }

    pub fn consumer_stats(&self) -> Vec<ConsumerStatsSnapshot> {
        self.consumers
            .lock()
            .iter()
            .map(ConsumerHandle::stats)
            .collect()
    }

    /// Messages that reached a terminal outcome, across all queues
    pub fn handled_count(&self) -> u64 {
        self.consumer_stats()
            .iter()
            .map(|stats| stats.completed + stats.discarded + stats.dead_lettered)
            .sum()
    }

    /// Stop consuming and release every resource, best-effort
    ///
    /// Consumers finish the message they are on before stopping. A second call
    /// does nothing and returns an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.shutdown_tx.send_replace(true) {
            warn!("Engine already shut down");
            return ShutdownReport::default();
        }
        info!("🛑 ENGINE: Shutdown requested");

        let consumers = std::mem::take(&mut *self.consumers.lock());
        let counters: Vec<_> = consumers
            .iter()
            .map(|consumer| (consumer.queue().to_string(), consumer.counters()))
            .collect();

        let mut report = ShutdownReport::default();
        for stopped in join_all(consumers.into_iter().map(ConsumerHandle::join)).await {
            if stopped {
                report.consumers_stopped += 1;
            } else {
                report.consumers_failed += 1;
            }
        }
        // Snapshot after joining so the last in-flight messages are counted
        report.consumer_stats = counters
            .iter()
            .map(|(queue, stats)| stats.snapshot(queue))
            .collect();

        report.connections_closed = self.gateway.connections().close_all().await;
        report.transformers_shut_down = self.conveyor.shutdown().await;

        if let Some(indexer) = &self.indexer {
            match indexer.shutdown().await {
                Ok(()) => report.indexer_shut_down = true,
                Err(e) => warn!(indexer_id = %indexer.id(), error = %e, "Indexer shutdown failed"),
            }
        }

        report.subscribers_shut_down = self.subscribers.shutdown_all().await;

        info!(
            consumers_stopped = report.consumers_stopped,
            consumers_failed = report.consumers_failed,
            connections_closed = report.connections_closed,
            "✅ ENGINE: Shutdown complete"
        );
        report
    }
}

impl std::fmt::Debug for CurationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurationEngine")
            .field("listen_queue", &self.config.broker.listen_queue)
            .field("queues", &self.queues())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
