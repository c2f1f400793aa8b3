//! Shared doubles for integration tests
//!
//! Recording plugins keep their observations in an [`Observations`] shared by
//! every instance the registry creates, so tests can assert on what ran even
//! though the dispatcher resolves a fresh instance per order.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use curator_core::config::CuratorConfig;
use curator_core::events::EventPublisher;
use curator_core::messaging::providers::InMemoryBrokerHub;
use curator_core::messaging::{BrokerConnectionRegistry, BrokerConnector, MessagingGateway};
use curator_core::models::{DigitalObject, Message, OrderBatch};
use curator_core::orchestration::{
    ConveyorBelt, CurationEngine, DecisionError, DecisionFunction, DecisionResult,
    DispatcherContext, QueueDispatcher,
};
use curator_core::registry::{
    Indexer, Plugin, PluginError, PluginRegistry, PluginResult, Subscriber, SubscriberRegistry,
    Transformer,
};
use curator_core::storage::{InMemoryObjectStore, ObjectStore};

pub const BROKER: &str = "localhost";
pub const LISTEN_QUEUE: &str = "transactionManager";

/// Everything the recording plugins saw, in call order
#[derive(Debug, Default)]
pub struct Observations {
    pub transforms: Mutex<Vec<(String, String)>>,
    pub transform_configs: Mutex<Vec<(String, Value)>>,
    pub indexed: Mutex<Vec<String>>,
    pub commits: Mutex<usize>,
    pub notifications: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    pub inits: Mutex<Vec<String>>,
    pub shutdowns: Mutex<Vec<String>>,
}

impl Observations {
    pub fn transformed(&self) -> Vec<(String, String)> {
        self.transforms.lock().clone()
    }

    pub fn indexed(&self) -> Vec<String> {
        self.indexed.lock().clone()
    }

    pub fn notifications(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.notifications.lock().clone()
    }
}

/// Sets `<flag>=true` on every object it sees
pub struct FlagTransformer {
    id: String,
    flag: String,
    observations: Arc<Observations>,
}

#[async_trait]
impl Plugin for FlagTransformer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn init(&self, _config: &Value) -> PluginResult<()> {
        self.observations.inits.lock().push(self.id.clone());
        Ok(())
    }

    async fn shutdown(&self) -> PluginResult<()> {
        self.observations.shutdowns.lock().push(self.id.clone());
        Ok(())
    }
}

#[async_trait]
impl Transformer for FlagTransformer {
    async fn transform(&self, mut object: DigitalObject, config: &Value) -> PluginResult<DigitalObject> {
        self.observations
            .transforms
            .lock()
            .push((self.id.clone(), object.id.clone()));
        self.observations
            .transform_configs
            .lock()
            .push((self.id.clone(), config.clone()));
        object.set_property(self.flag.clone(), "true");
        Ok(object)
    }
}

/// Always fails, optionally by panicking
pub struct FailingTransformer {
    id: String,
    panic: bool,
}

#[async_trait]
impl Plugin for FailingTransformer {
    fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl Transformer for FailingTransformer {
    async fn transform(&self, object: DigitalObject, _config: &Value) -> PluginResult<DigitalObject> {
        if self.panic {
            panic!("transformer {} blew up", self.id);
        }
        Err(PluginError::transform(&self.id, &object.id, "cannot read datastream"))
    }
}

pub struct RecordingIndexer {
    id: String,
    observations: Arc<Observations>,
}

#[async_trait]
impl Plugin for RecordingIndexer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn shutdown(&self) -> PluginResult<()> {
        self.observations.shutdowns.lock().push(self.id.clone());
        Ok(())
    }
}

#[async_trait]
impl Indexer for RecordingIndexer {
    async fn index(&self, oid: &str) -> PluginResult<()> {
        self.observations.indexed.lock().push(oid.to_string());
        Ok(())
    }

    async fn commit(&self) -> PluginResult<()> {
        *self.observations.commits.lock() += 1;
        Ok(())
    }
}

pub struct RecordingSubscriber {
    id: String,
    fail: bool,
    observations: Arc<Observations>,
}

#[async_trait]
impl Plugin for RecordingSubscriber {
    fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    async fn notify(&self, fields: &BTreeMap<String, String>) -> PluginResult<()> {
        if self.fail {
            return Err(PluginError::notify(&self.id, "audit store unavailable"));
        }
        self.observations
            .notifications
            .lock()
            .push((self.id.clone(), fields.clone()));
        Ok(())
    }
}

/// Registry with the standard set of doubles:
///
/// - transformers `flagA`, `flagB`, `order1`, `order2`, `dcToMods`, `thumbnailer`,
///   `userPriority` set a flag of the same name
/// - `broken` fails, `explosive` panics
/// - indexer `recordingIndexer`
/// - subscribers `auditLog`, `mailer`, and `flakySubscriber` which always fails
pub fn recording_registry(observations: &Arc<Observations>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();

    for id in ["flagA", "flagB", "order1", "order2", "dcToMods", "thumbnailer", "userPriority"] {
        let observations = observations.clone();
        registry
            .register_transformer(id, move || {
                Arc::new(FlagTransformer {
                    id: id.to_string(),
                    flag: id.to_string(),
                    observations: observations.clone(),
                })
            })
            .unwrap();
    }

    registry
        .register_transformer("broken", || {
            Arc::new(FailingTransformer {
                id: "broken".to_string(),
                panic: false,
            })
        })
        .unwrap();
    registry
        .register_transformer("explosive", || {
            Arc::new(FailingTransformer {
                id: "explosive".to_string(),
                panic: true,
            })
        })
        .unwrap();

    let indexer_observations = observations.clone();
    registry
        .register_indexer("recordingIndexer", move || {
            Arc::new(RecordingIndexer {
                id: "recordingIndexer".to_string(),
                observations: indexer_observations.clone(),
            })
        })
        .unwrap();

    for (id, fail) in [("auditLog", false), ("mailer", false), ("flakySubscriber", true)] {
        let observations = observations.clone();
        registry
            .register_subscriber(id, move || {
                Arc::new(RecordingSubscriber {
                    id: id.to_string(),
                    fail,
                    observations: observations.clone(),
                })
            })
            .unwrap();
    }

    registry
}

/// Decision function answering from a per-oid script
///
/// Unknown oids get an empty batch; oids marked failing raise.
#[derive(Default)]
pub struct ScriptedDecision {
    batches: Mutex<HashMap<String, OrderBatch>>,
    failing: Mutex<Vec<String>>,
    seen: Mutex<Vec<Message>>,
}

impl ScriptedDecision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, oid: &str, batch: OrderBatch) -> &Self {
        self.batches.lock().insert(oid.to_string(), batch);
        self
    }

    pub fn fail_for(&self, oid: &str) -> &Self {
        self.failing.lock().push(oid.to_string());
        self
    }

    /// Every message evaluated, in order
    pub fn seen(&self) -> Vec<Message> {
        self.seen.lock().clone()
    }

    pub fn seen_oids(&self) -> Vec<String> {
        self.seen.lock().iter().map(|m| m.oid.clone()).collect()
    }
}

#[async_trait]
impl DecisionFunction for ScriptedDecision {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn evaluate(&self, message: &Message) -> DecisionResult<OrderBatch> {
        self.seen.lock().push(message.clone());
        if self.failing.lock().contains(&message.oid) {
            return Err(DecisionError::failed("scripted", &message.oid, "policy lookup failed"));
        }
        Ok(self
            .batches
            .lock()
            .get(&message.oid)
            .cloned()
            .unwrap_or_default())
    }
}

/// Seed a store with empty objects
pub fn store_with(oids: &[&str]) -> InMemoryObjectStore {
    let store = InMemoryObjectStore::new();
    for oid in oids {
        store.insert(DigitalObject::new(*oid));
    }
    store
}

/// Configuration used by engine tests: fast polling, recording indexer
pub fn test_config() -> CuratorConfig {
    let mut config = CuratorConfig::default();
    config.broker.default_address = BROKER.to_string();
    config.broker.listen_queue = LISTEN_QUEUE.to_string();
    config.broker.receive_wait_ms = 20;
    config.broker.receive_error_backoff_ms = 20;
    config.dispatcher.indexer = Some("recordingIndexer".to_string());
    config.dispatcher.subscribers = vec!["auditLog".to_string()];
    config
}

/// A dispatcher wired directly to in-memory collaborators, no consumers
pub struct DispatcherHarness {
    pub hub: Arc<InMemoryBrokerHub>,
    pub store: InMemoryObjectStore,
    pub observations: Arc<Observations>,
    pub gateway: MessagingGateway,
    pub subscribers: Arc<SubscriberRegistry>,
    pub dispatcher: QueueDispatcher,
}

impl DispatcherHarness {
    pub async fn new(config: CuratorConfig, decision: Arc<dyn DecisionFunction>, oids: &[&str]) -> Self {
        let observations = Arc::new(Observations::default());
        let registry = Arc::new(recording_registry(&observations));
        let hub = Arc::new(InMemoryBrokerHub::new());
        let connector: Arc<dyn BrokerConnector> = hub.clone();
        let gateway = MessagingGateway::new(
            Arc::new(BrokerConnectionRegistry::new(connector)),
            EventPublisher::new(config.events.channel_capacity),
        );

        let subscribers = Arc::new(SubscriberRegistry::new());
        for id in &config.dispatcher.subscribers {
            subscribers
                .register(registry.subscriber(id).unwrap())
                .await
                .unwrap();
        }

        let indexer: Option<Arc<dyn Indexer>> = config
            .dispatcher
            .indexer
            .as_deref()
            .map(|id| registry.indexer(id).unwrap());

        let store = store_with(oids);
        let object_store: Arc<dyn ObjectStore> = Arc::new(store.clone());
        let conveyor = Arc::new(ConveyorBelt::warm(config.conveyor.clone(), &registry).await);

        let dispatcher = QueueDispatcher::new(
            config.broker.listen_queue.clone(),
            config.broker.default_address.clone(),
            decision,
            DispatcherContext {
                registry,
                store: object_store,
                conveyor,
                subscribers: subscribers.clone(),
                indexer,
                gateway: gateway.clone(),
            },
            config.dispatcher.clone(),
        );

        Self {
            hub,
            store,
            observations,
            gateway,
            subscribers,
            dispatcher,
        }
    }

    pub fn object(&self, oid: &str) -> DigitalObject {
        self.store.snapshot(oid).unwrap()
    }
}

/// A running engine on an in-memory hub
pub struct EngineHarness {
    pub hub: Arc<InMemoryBrokerHub>,
    pub store: InMemoryObjectStore,
    pub observations: Arc<Observations>,
    pub engine: CurationEngine,
}

impl EngineHarness {
    pub async fn start(config: CuratorConfig, decision: Arc<dyn DecisionFunction>, oids: &[&str]) -> Self {
        Self::start_on(Arc::new(InMemoryBrokerHub::new()), config, decision, oids).await
    }

    pub async fn start_on(
        hub: Arc<InMemoryBrokerHub>,
        config: CuratorConfig,
        decision: Arc<dyn DecisionFunction>,
        oids: &[&str],
    ) -> Self {
        let observations = Arc::new(Observations::default());
        let registry = Arc::new(recording_registry(&observations));
        let store = store_with(oids);

        let engine = CurationEngine::bootstrap(
            config,
            registry,
            Arc::new(store.clone()),
            decision,
            hub.clone(),
        )
        .await
        .unwrap();

        Self {
            hub,
            store,
            observations,
            engine,
        }
    }

    pub fn object(&self, oid: &str) -> DigitalObject {
        self.store.snapshot(oid).unwrap()
    }

    /// Wait until the engine has handled at least `count` messages
    pub async fn wait_for_handled(&self, count: u64) {
        let engine = &self.engine;
        wait_until(Duration::from_secs(5), || async move { engine.handled_count() >= count }).await;
    }
}

/// Poll `condition` every 10ms until it holds; panic after `timeout`
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
