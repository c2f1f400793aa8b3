//! # Storage Contract
//!
//! The narrow surface the engine needs from the object store: load a digital
//! object, save it back, check existence. Persistence mechanics live behind
//! the trait.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::models::DigitalObject;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Object not found: {oid}")]
    NotFound { oid: String },

    #[error("Storage backend error during {operation} of '{oid}': {message}")]
    Backend {
        operation: String,
        oid: String,
        message: String,
    },
}

impl StorageError {
    pub fn not_found(oid: impl Into<String>) -> Self {
        Self::NotFound { oid: oid.into() }
    }

    pub fn backend(
        operation: impl Into<String>,
        oid: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Backend {
            operation: operation.into(),
            oid: oid.into(),
            message: message.into(),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    async fn get_object(&self, oid: &str) -> StorageResult<DigitalObject>;

    /// Persist `object` under its own id, replacing any previous version
    async fn save_object(&self, object: &DigitalObject) -> StorageResult<()>;

    async fn exists(&self, oid: &str) -> StorageResult<bool>;
}

/// Concurrent in-process object store
#[derive(Debug, Default, Clone)]
pub struct InMemoryObjectStore {
    objects: Arc<DashMap<String, DigitalObject>>,
    saves: Arc<AtomicU64>,
    /// Fail every operation while set
    offline: Arc<AtomicBool>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without counting it as a save
    pub fn insert(&self, object: DigitalObject) {
        self.objects.insert(object.id.clone(), object);
    }

    /// Snapshot of an object, or `None`
    pub fn snapshot(&self, oid: &str) -> Option<DigitalObject> {
        self.objects.get(oid).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self, operation: &str, oid: &str) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::backend(operation, oid, "store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_object(&self, oid: &str) -> StorageResult<DigitalObject> {
        self.check_online("get", oid)?;
        self.snapshot(oid).ok_or_else(|| StorageError::not_found(oid))
    }

    async fn save_object(&self, object: &DigitalObject) -> StorageResult<()> {
        self.check_online("save", &object.id)?;
        self.objects.insert(object.id.clone(), object.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        debug!(oid = %object.id, "Object saved");
        Ok(())
    }

    async fn exists(&self, oid: &str) -> StorageResult<bool> {
        self.check_online("exists", oid)?;
        Ok(self.objects.contains_key(oid))
    }
}
