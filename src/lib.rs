#![allow(clippy::doc_markdown)] // Allow technical terms like ActiveMQ, PostgreSQL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Curator Core
//!
//! Transaction orchestration engine for institutional content repositories.
//!
//! ## Overview
//!
//! Every change to a digital object arrives as a small JSON message on a
//! queue. A pluggable decision function turns that message into an ordered
//! batch of orders; the engine executes the batch one order at a time:
//!
//! - **Transform**: run a transformer, or a whole conveyor stage, and save the object
//! - **Index**: hand the object to the indexing collaborator, optionally committing
//! - **Notify**: fan a field map out to every subscriber
//! - **Dispatch**: send a new message, possibly to another queue on another broker
//!
//! A failing order is logged and the next order still runs. Only malformed
//! input and a failing decision function stop a message early.
//!
//! ## Module Organization
//!
//! - [`models`] - Messages, orders and digital objects
//! - [`orchestration`] - Decision functions, dispatcher, conveyor belt, consumers, engine
//! - [`registry`] - Plugin contracts, plugin registry and subscriber fan-out
//! - [`messaging`] - Broker connections, connection cache and messaging gateway
//! - [`storage`] - Object store contract and in-memory store
//! - [`events`] - Broadcast publisher behind `publish_event`
//! - [`config`] - Configuration loading and validation
//! - [`logging`] - Structured logging setup and helpers
//! - [`error`] - Crate-level error aggregation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use curator_core::config::CuratorConfig;
//! use curator_core::messaging::providers::InMemoryBrokerHub;
//! use curator_core::models::Message;
//! use curator_core::orchestration::{CurationEngine, StandardTransactionManager};
//! use curator_core::registry::PluginRegistry;
//! use curator_core::storage::InMemoryObjectStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> curator_core::Result<()> {
//! curator_core::logging::init_structured_logging();
//!
//! let engine = CurationEngine::bootstrap(
//!     CuratorConfig::default(),
//!     Arc::new(PluginRegistry::new()),
//!     Arc::new(InMemoryObjectStore::new()),
//!     Arc::new(StandardTransactionManager::default()),
//!     Arc::new(InMemoryBrokerHub::new()),
//! )
//! .await?;
//!
//! engine.submit(&Message::new("uuid:1234")).await?;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod storage;

pub use config::{ConfigManager, CuratorConfig};
pub use error::{CuratorError, Result};
pub use models::{DigitalObject, Message, Order, OrderBatch, OrderType};
pub use orchestration::{
    CurationEngine, DecisionFunction, MessageOutcome, QueueDispatcher,
    StandardTransactionManager,
};
pub use registry::{Indexer, Plugin, PluginRegistry, Subscriber, Transformer};
pub use storage::{InMemoryObjectStore, ObjectStore};
