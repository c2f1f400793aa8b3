//! # Registry Infrastructure
//!
//! Plugin contracts and the registries that hand plugins to the engine.
//!
//! ```text
//! Registry Infrastructure
//! ├── plugin               (Plugin / Transformer / Indexer / Subscriber)
//! ├── PluginRegistry       (factories keyed by kind and id)
//! └── SubscriberRegistry   (live Notify fan-out with statistics)
//! ```

pub mod plugin;
pub mod plugin_registry;
pub mod subscriber_registry;

pub use plugin::{Indexer, Plugin, PluginError, PluginResult, Subscriber, Transformer};
pub use plugin_registry::{
    PluginInstance, PluginKind, PluginRegistry, PluginStats, RegistryError, RegistryResult,
};
pub use subscriber_registry::{
    NotificationSummary, SubscriberDetail, SubscriberRegistry, SubscriberStats, Subscription,
};
