//! # Plugin Registry
//!
//! Resolves a capability id to a fresh plugin instance.
//!
//! ## Overview
//!
//! Deployments register one factory per (kind, id) while the process starts,
//! then share the registry as `Arc<PluginRegistry>` with every component that
//! needs plugins. Nothing looks plugins up through global state.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut registry = PluginRegistry::new();
//! registry.register_transformer("dcToMods", || Arc::new(DcToMods::default()))?;
//! registry.register_indexer("solr", || Arc::new(SolrIndexer::default()))?;
//!
//! let registry = Arc::new(registry);
//! let transformer = registry.transformer("dcToMods")?;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::plugin::{Indexer, PluginResult, Subscriber, Transformer};
use serde_json::Value;

/// The capability a plugin provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Transformer,
    Indexer,
    Subscriber,
}

impl PluginKind {
    pub const ALL: [PluginKind; 3] = [Self::Transformer, Self::Indexer, Self::Subscriber];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transformer => "transformer",
            Self::Indexer => "indexer",
            Self::Subscriber => "subscriber",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No {kind} registered with id '{id}'")]
    NotFound { kind: PluginKind, id: String },

    #[error("Plugin '{id}' is registered as a {actual}, not a {expected}")]
    WrongKind {
        id: String,
        expected: PluginKind,
        actual: PluginKind,
    },

    #[error("A {kind} with id '{id}' is already registered")]
    Duplicate { kind: PluginKind, id: String },
}

impl RegistryError {
    pub fn not_found(kind: PluginKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn duplicate(kind: PluginKind, id: impl Into<String>) -> Self {
        Self::Duplicate {
            kind,
            id: id.into(),
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

pub type TransformerFactory = Arc<dyn Fn() -> Arc<dyn Transformer> + Send + Sync>;
pub type IndexerFactory = Arc<dyn Fn() -> Arc<dyn Indexer> + Send + Sync>;
pub type SubscriberFactory = Arc<dyn Fn() -> Arc<dyn Subscriber> + Send + Sync>;

/// A live plugin of any kind
#[derive(Clone)]
pub enum PluginInstance {
    Transformer(Arc<dyn Transformer>),
    Indexer(Arc<dyn Indexer>),
    Subscriber(Arc<dyn Subscriber>),
}

impl PluginInstance {
    pub fn kind(&self) -> PluginKind {
        match self {
            Self::Transformer(_) => PluginKind::Transformer,
            Self::Indexer(_) => PluginKind::Indexer,
            Self::Subscriber(_) => PluginKind::Subscriber,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Transformer(p) => p.id(),
            Self::Indexer(p) => p.id(),
            Self::Subscriber(p) => p.id(),
        }
    }

    pub async fn init(&self, config: &Value) -> PluginResult<()> {
        match self {
            Self::Transformer(p) => p.init(config).await,
            Self::Indexer(p) => p.init(config).await,
            Self::Subscriber(p) => p.init(config).await,
        }
    }

    pub async fn shutdown(&self) -> PluginResult<()> {
        match self {
            Self::Transformer(p) => p.shutdown().await,
            Self::Indexer(p) => p.shutdown().await,
            Self::Subscriber(p) => p.shutdown().await,
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("kind", &self.kind())
            .field("id", &self.id())
            .finish()
    }
}

/// Registry of plugin factories keyed by kind and id
#[derive(Default)]
pub struct PluginRegistry {
    transformers: HashMap<String, TransformerFactory>,
    indexers: HashMap<String, IndexerFactory>,
    subscribers: HashMap<String, SubscriberFactory>,
    resolutions: AtomicU64,
    failed_resolutions: AtomicU64,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_transformer<F>(&mut self, id: impl Into<String>, factory: F) -> RegistryResult<()>
    where
        F: Fn() -> Arc<dyn Transformer> + Send + Sync + 'static,
    {
        let factory: TransformerFactory = Arc::new(factory);
        Self::insert(&mut self.transformers, PluginKind::Transformer, id.into(), factory)
    }

    pub fn register_indexer<F>(&mut self, id: impl Into<String>, factory: F) -> RegistryResult<()>
    where
        F: Fn() -> Arc<dyn Indexer> + Send + Sync + 'static,
    {
        let factory: IndexerFactory = Arc::new(factory);
        Self::insert(&mut self.indexers, PluginKind::Indexer, id.into(), factory)
    }

    pub fn register_subscriber<F>(&mut self, id: impl Into<String>, factory: F) -> RegistryResult<()>
    where
        F: Fn() -> Arc<dyn Subscriber> + Send + Sync + 'static,
    {
        let factory: SubscriberFactory = Arc::new(factory);
        Self::insert(&mut self.subscribers, PluginKind::Subscriber, id.into(), factory)
    }

    fn insert<T>(
        map: &mut HashMap<String, T>,
        kind: PluginKind,
        id: String,
        factory: T,
    ) -> RegistryResult<()> {
        if map.contains_key(&id) {
            return Err(RegistryError::duplicate(kind, id));
        }
        info!(kind = %kind, plugin_id = %id, "Registered plugin factory");
        map.insert(id, factory);
        Ok(())
    }

    /// Create a fresh instance of the plugin registered under (kind, id)
    pub fn resolve(&self, kind: PluginKind, id: &str) -> RegistryResult<PluginInstance> {
        let instance = match kind {
            PluginKind::Transformer => self
                .transformers
                .get(id)
                .map(|factory| PluginInstance::Transformer(factory())),
            PluginKind::Indexer => self
                .indexers
                .get(id)
                .map(|factory| PluginInstance::Indexer(factory())),
            PluginKind::Subscriber => self
                .subscribers
                .get(id)
                .map(|factory| PluginInstance::Subscriber(factory())),
        };

        match instance {
            Some(instance) => {
                self.resolutions.fetch_add(1, Ordering::Relaxed);
                debug!(kind = %kind, plugin_id = %id, "Resolved plugin");
                Ok(instance)
            }
            None => {
                self.failed_resolutions.fetch_add(1, Ordering::Relaxed);
                Err(self.missing(kind, id))
            }
        }
    }

    /// Error for an id absent under `kind`, naming the kind it does exist under
    fn missing(&self, expected: PluginKind, id: &str) -> RegistryError {
        PluginKind::ALL
            .into_iter()
            .find(|kind| *kind != expected && self.contains(*kind, id))
            .map(|actual| RegistryError::WrongKind {
                id: id.to_string(),
                expected,
                actual,
            })
            .unwrap_or_else(|| RegistryError::not_found(expected, id))
    }

    pub fn transformer(&self, id: &str) -> RegistryResult<Arc<dyn Transformer>> {
        match self.resolve(PluginKind::Transformer, id)? {
            PluginInstance::Transformer(plugin) => Ok(plugin),
            other => Err(self.wrong_kind(id, PluginKind::Transformer, other.kind())),
        }
    }

    pub fn indexer(&self, id: &str) -> RegistryResult<Arc<dyn Indexer>> {
        match self.resolve(PluginKind::Indexer, id)? {
            PluginInstance::Indexer(plugin) => Ok(plugin),
            other => Err(self.wrong_kind(id, PluginKind::Indexer, other.kind())),
        }
    }

    pub fn subscriber(&self, id: &str) -> RegistryResult<Arc<dyn Subscriber>> {
        match self.resolve(PluginKind::Subscriber, id)? {
            PluginInstance::Subscriber(plugin) => Ok(plugin),
            other => Err(self.wrong_kind(id, PluginKind::Subscriber, other.kind())),
        }
    }

    fn wrong_kind(&self, id: &str, expected: PluginKind, actual: PluginKind) -> RegistryError {
        RegistryError::WrongKind {
            id: id.to_string(),
            expected,
            actual,
        }
    }

    pub fn contains(&self, kind: PluginKind, id: &str) -> bool {
        match kind {
            PluginKind::Transformer => self.transformers.contains_key(id),
            PluginKind::Indexer => self.indexers.contains_key(id),
            PluginKind::Subscriber => self.subscribers.contains_key(id),
        }
    }

    /// Registered ids for one kind, sorted
    pub fn registered_ids(&self, kind: PluginKind) -> Vec<String> {
        let mut ids: Vec<String> = match kind {
            PluginKind::Transformer => self.transformers.keys().cloned().collect(),
            PluginKind::Indexer => self.indexers.keys().cloned().collect(),
            PluginKind::Subscriber => self.subscribers.keys().cloned().collect(),
        };
        ids.sort();
        ids
    }

    pub fn stats(&self) -> PluginStats {
        let registered = PluginKind::ALL
            .into_iter()
            .map(|kind| (kind, self.registered_ids(kind).len()))
            .collect::<BTreeMap<_, _>>();

        PluginStats {
            total_plugins: registered.values().sum(),
            registered,
            resolutions: self.resolutions.load(Ordering::Relaxed),
            failed_resolutions: self.failed_resolutions.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("transformers", &self.registered_ids(PluginKind::Transformer))
            .field("indexers", &self.registered_ids(PluginKind::Indexer))
            .field("subscribers", &self.registered_ids(PluginKind::Subscriber))
            .finish()
    }
}

/// Statistics about registered plugins
#[derive(Debug, Clone, Default, Serialize)]
pub struct PluginStats {
    pub total_plugins: usize,
    pub registered: BTreeMap<PluginKind, usize>,
    pub resolutions: u64,
    pub failed_resolutions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DigitalObject;
    use crate::registry::plugin::Plugin;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    struct Passthrough;

    #[async_trait]
    impl Plugin for Passthrough {
        fn id(&self) -> &str {
            "passthrough"
        }
    }

    #[async_trait]
    impl Transformer for Passthrough {
        async fn transform(&self, object: DigitalObject, _config: &Value) -> PluginResult<DigitalObject> {
            Ok(object)
        }
    }

    struct Quiet;

    #[async_trait]
    impl Plugin for Quiet {
        fn id(&self) -> &str {
            "quiet"
        }
    }

    #[async_trait]
    impl Subscriber for Quiet {
        async fn notify(&self, _fields: &BTreeMap<String, String>) -> PluginResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_plugin_registry_creation() {
        let registry = PluginRegistry::new();
        assert_eq!(registry.stats().total_plugins, 0);
        assert!(registry.registered_ids(PluginKind::Transformer).is_empty());
    }

    #[test]
    fn test_resolve_creates_fresh_instances() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();

        let mut registry = PluginRegistry::new();
        registry
            .register_transformer("passthrough", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(Passthrough)
            })
            .unwrap();

        let first = registry.transformer("passthrough").unwrap();
        let second = registry.transformer("passthrough").unwrap();
        assert_eq!(first.id(), "passthrough");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = PluginRegistry::new();
        registry
            .register_transformer("passthrough", || Arc::new(Passthrough))
            .unwrap();

        let err = registry
            .register_transformer("passthrough", || Arc::new(Passthrough))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::duplicate(PluginKind::Transformer, "passthrough")
        );
    }

    #[test]
    fn test_missing_and_wrong_kind() {
        let mut registry = PluginRegistry::new();
        registry.register_subscriber("quiet", || Arc::new(Quiet)).unwrap();

        assert!(matches!(
            registry.transformer("nope"),
            Err(RegistryError::NotFound { kind: PluginKind::Transformer, .. })
        ));
        assert!(matches!(
            registry.resolve(PluginKind::Transformer, "quiet"),
            Err(RegistryError::WrongKind {
                expected: PluginKind::Transformer,
                actual: PluginKind::Subscriber,
                ..
            })
        ));

        let stats = registry.stats();
        assert_eq!(stats.total_plugins, 1);
        assert_eq!(stats.failed_resolutions, 2);
        assert_eq!(stats.registered[&PluginKind::Subscriber], 1);
    }

    #[tokio::test]
    async fn test_plugin_instance_lifecycle() {
        let mut registry = PluginRegistry::new();
        registry.register_subscriber("quiet", || Arc::new(Quiet)).unwrap();

        let instance = registry.resolve(PluginKind::Subscriber, "quiet").unwrap();
        assert_eq!(instance.kind(), PluginKind::Subscriber);
        assert_eq!(instance.id(), "quiet");
        assert!(instance.init(&Value::Null).await.is_ok());
        assert!(instance.shutdown().await.is_ok());
    }
}
