//! # Crate Error Types
//!
//! Each layer owns a `thiserror` enum; `CuratorError` aggregates them for
//! callers that sit above several layers (bootstrap, binaries).

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::orchestration::decision::DecisionError;
use crate::registry::{PluginError, RegistryError};
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum CuratorError {
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Decision error: {0}")]
    Decision(#[from] DecisionError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Engine error: {0}")]
    Engine(String),
}

impl CuratorError {
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CuratorError>;
