//! # Plugin Contracts
//!
//! Capabilities the engine calls by id: transformers, indexers and
//! subscribers. Every plugin shares the `init`/`shutdown` lifecycle; the
//! algorithms behind the action methods belong to the plugin authors.
//!
//! Action methods take `&self` so one instance can sit behind an `Arc` in the
//! transformer pool or the subscriber fan-out; plugins that keep state use
//! interior mutability.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::DigitalObject;

/// Failures raised by plugin code
#[derive(Error, Debug, Clone)]
pub enum PluginError {
    #[error("Plugin '{plugin_id}' failed to initialize: {message}")]
    Init { plugin_id: String, message: String },

    #[error("Transformer '{plugin_id}' failed on object '{oid}': {message}")]
    Transform {
        plugin_id: String,
        oid: String,
        message: String,
    },

    #[error("Indexer '{plugin_id}' failed: {message}")]
    Index { plugin_id: String, message: String },

    #[error("Subscriber '{plugin_id}' failed to handle notification: {message}")]
    Notify { plugin_id: String, message: String },

    #[error("Plugin '{plugin_id}' failed to shut down: {message}")]
    Shutdown { plugin_id: String, message: String },
}

impl PluginError {
    pub fn init(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Init {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }

    pub fn transform(
        plugin_id: impl Into<String>,
        oid: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transform {
            plugin_id: plugin_id.into(),
            oid: oid.into(),
            message: message.into(),
        }
    }

    pub fn index(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Index {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }

    pub fn notify(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Notify {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }

    pub fn shutdown(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Shutdown {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        match self {
            Self::Init { plugin_id, .. }
            | Self::Transform { plugin_id, .. }
            | Self::Index { plugin_id, .. }
            | Self::Notify { plugin_id, .. }
            | Self::Shutdown { plugin_id, .. } => plugin_id,
        }
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Lifecycle shared by every plugin kind
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Id the plugin was registered under
    fn id(&self) -> &str;

    async fn init(&self, _config: &Value) -> PluginResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> PluginResult<()> {
        Ok(())
    }
}

/// Rewrites a digital object
///
/// The returned object replaces the input for whatever runs next, so a
/// transformer may hand back a different object (a derived package, say).
#[async_trait]
pub trait Transformer: Plugin {
    async fn transform(&self, object: DigitalObject, config: &Value) -> PluginResult<DigitalObject>;
}

#[async_trait]
pub trait Indexer: Plugin {
    async fn index(&self, oid: &str) -> PluginResult<()>;

    /// Make pending index changes visible
    async fn commit(&self) -> PluginResult<()> {
        Ok(())
    }
}

/// Receives flattened notification fields
#[async_trait]
pub trait Subscriber: Plugin {
    async fn notify(&self, fields: &BTreeMap<String, String>) -> PluginResult<()>;
}
