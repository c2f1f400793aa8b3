//! # Configuration
//!
//! Typed configuration for the curation engine.
//!
//! ```toml
//! [broker]
//! default_address = "localhost:61616"
//! listen_queue = "transactionManager"
//!
//! [dispatcher]
//! indexer = "solr"
//! subscribers = ["auditLog"]
//!
//! [conveyor.stages]
//! harvestQueue = ["dcToMods", "thumbnailer"]
//!
//! [conveyor.transformer_defaults.dcToMods]
//! schema = "mods-3.7"
//! ```
//!
//! Loaded through [`ConfigManager`] from `config/curator.toml`, an optional
//! `config/environments/{env}.toml` and `CURATOR__SECTION__KEY` environment
//! variables, in that order.

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::constants::{metadata, DEFAULT_BROKER_ADDRESS, DEFAULT_LISTEN_QUEUE};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CuratorConfig {
    pub broker: BrokerConfig,
    pub dispatcher: DispatcherConfig,
    pub conveyor: ConveyorConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerProvider {
    #[default]
    InMemory,
    Pgmq,
}

impl BrokerProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::Pgmq => "pgmq",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker used when an order carries no override
    pub default_address: String,
    pub provider: BrokerProvider,
    /// The dispatcher's own queue; default target of `Dispatch` orders
    pub listen_queue: String,
    /// Extra queues consumed by the same dispatcher
    pub additional_queues: Vec<String>,
    pub receive_wait_ms: u64,
    pub receive_error_backoff_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_address: DEFAULT_BROKER_ADDRESS.to_string(),
            provider: BrokerProvider::default(),
            listen_queue: DEFAULT_LISTEN_QUEUE.to_string(),
            additional_queues: Vec::new(),
            receive_wait_ms: 500,
            receive_error_backoff_ms: 1000,
        }
    }
}

impl BrokerConfig {
    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }

    pub fn receive_error_backoff(&self) -> Duration {
        Duration::from_millis(self.receive_error_backoff_ms)
    }

    /// `listen_queue` followed by each additional queue, without repeats
    pub fn consumed_queues(&self) -> Vec<&str> {
        let mut queues = vec![self.listen_queue.as_str()];
        for queue in &self.additional_queues {
            if !queues.contains(&queue.as_str()) {
                queues.push(queue);
            }
        }
        queues
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Default indexer plugin id for `Index` orders without a target
    pub indexer: Option<String>,
    /// Subscriber plugin ids instantiated into the `Notify` fan-out
    pub subscribers: Vec<String>,
    /// Init configuration per plugin id
    pub plugin_config: BTreeMap<String, Value>,
    pub publish_lifecycle_events: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            indexer: None,
            subscribers: Vec::new(),
            plugin_config: BTreeMap::new(),
            publish_lifecycle_events: true,
        }
    }
}

impl DispatcherConfig {
    /// Init configuration for a plugin, `{}` when none is configured
    pub fn plugin_init_config(&self, plugin_id: &str) -> Value {
        self.plugin_config
            .get(plugin_id)
            .cloned()
            .unwrap_or_else(|| json!({}))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConveyorConfig {
    /// Stage id -> default transformer chain
    pub stages: BTreeMap<String, Vec<String>>,
    /// Transformer id -> init configuration; one pooled instance each
    pub transformer_defaults: BTreeMap<String, Value>,
    /// Transformer id -> per-item configuration passed to `transform`
    pub transformer_overrides: BTreeMap<String, Value>,
    pub user_priority_flag: String,
    pub user_priority_selector: String,
    /// Stages resolved at execution time, where the user-priority flag is ignored
    pub execution_stages: Vec<String>,
}

impl Default for ConveyorConfig {
    fn default() -> Self {
        Self {
            stages: BTreeMap::new(),
            transformer_defaults: BTreeMap::new(),
            transformer_overrides: BTreeMap::new(),
            user_priority_flag: metadata::USER_PRIORITY.to_string(),
            user_priority_selector: metadata::USER_PRIORITY_SELECTOR.to_string(),
            execution_stages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast capacity for `publish_event` listeners
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}

impl CuratorConfig {
    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.broker.listen_queue.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "listen_queue",
                "broker configuration",
            ));
        }

        if self.broker.default_address.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "default_address",
                "broker configuration",
            ));
        }

        if let Some(queue) = self
            .broker
            .additional_queues
            .iter()
            .find(|queue| queue.trim().is_empty())
        {
            return Err(ConfigurationError::invalid_value(
                "broker.additional_queues",
                queue.clone(),
                "queue ids must not be blank",
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "must be greater than 0",
            ));
        }

        // An empty list is a stage with no default chain
        for (stage, transformers) in &self.conveyor.stages {
            if transformers.iter().any(|id| id.trim().is_empty()) {
                return Err(ConfigurationError::invalid_value(
                    format!("conveyor.stages.{stage}"),
                    transformers.join(","),
                    "transformer ids must not be blank",
                ));
            }
        }

        if self.conveyor.user_priority_flag.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "user_priority_flag",
                "conveyor configuration",
            ));
        }

        if self.conveyor.user_priority_selector.trim().is_empty() {
            return Err(ConfigurationError::validation_error(format!(
                "user_priority_flag '{}' is set but user_priority_selector names no transformer",
                self.conveyor.user_priority_flag
            )));
        }

        if let Some(stage) = self
            .conveyor
            .execution_stages
            .iter()
            .find(|stage| stage.trim().is_empty())
        {
            return Err(ConfigurationError::invalid_value(
                "conveyor.execution_stages",
                stage.clone(),
                "stage ids must not be blank",
            ));
        }

        if let Some(indexer) = &self.dispatcher.indexer {
            if indexer.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    "dispatcher.indexer",
                    indexer.clone(),
                    "leave unset instead of blank",
                ));
            }
        }

        Ok(())
    }

    /// Stages whose chains name a transformer that is not in the warm pool
    ///
    /// Not an error: unknown chain entries are skipped at run time.
    pub fn unpooled_chain_entries(&self) -> Vec<(String, String)> {
        self.conveyor
            .stages
            .iter()
            .flat_map(|(stage, ids)| {
                ids.iter()
                    .filter(|id| !self.conveyor.transformer_defaults.contains_key(id.as_str()))
                    .map(move |id| (stage.clone(), id.clone()))
            })
            .collect()
    }
}
