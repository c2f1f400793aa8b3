//! # Broker Connection Registry
//!
//! Caches one open connection per broker address. Keys are the address
//! strings exactly as callers wrote them: `localhost:61616` and
//! `127.0.0.1:61616` are two entries even when they reach the same broker.
//! Once closed, the registry opens no further connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::connection::{BrokerConnection, BrokerConnector};
use super::{MessagingError, MessagingResult};
use crate::logging::log_broker_operation;

#[derive(Debug)]
pub struct BrokerConnectionRegistry {
    connector: Arc<dyn BrokerConnector>,
    connections: RwLock<HashMap<String, Arc<dyn BrokerConnection>>>,
    closed: AtomicBool,
}

impl BrokerConnectionRegistry {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            connections: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the cached connection for `address`, opening it on first use
    ///
    /// A cached connection found closed is replaced by a fresh one. Fails
    /// with `ConnectionClosed` after [`close_all`](Self::close_all).
    pub async fn get_connection(&self, address: &str) -> MessagingResult<Arc<dyn BrokerConnection>> {
        if self.is_closed() {
            return Err(MessagingError::connection_closed(address));
        }

        {
            let connections = self.connections.read().await;
            if let Some(connection) = connections.get(address) {
                if !connection.is_closed() {
                    return Ok(connection.clone());
                }
            }
        }

        let mut connections = self.connections.write().await;
        // close_all drains under this lock
        if self.is_closed() {
            return Err(MessagingError::connection_closed(address));
        }
        // Another task may have connected while we waited for the write lock
        if let Some(connection) = connections.get(address) {
            if !connection.is_closed() {
                return Ok(connection.clone());
            }
            warn!(broker = %address, "Cached broker connection was closed, reconnecting");
        }

        debug!(broker = %address, provider = self.connector.provider_name(), "Opening broker connection");
        let connection = self.connector.connect(address).await?;
        connections.insert(address.to_string(), connection.clone());

        log_broker_operation(
            "connect",
            address,
            None,
            "opened",
            Some(&format!("cached_connections={}", connections.len())),
        );
        Ok(connection)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Cached address keys, sorted
    pub async fn addresses(&self) -> Vec<String> {
        let connections = self.connections.read().await;
        let mut addresses: Vec<String> = connections.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub async fn contains(&self, address: &str) -> bool {
        self.connections.read().await.contains_key(address)
    }

    /// Close every cached connection, best-effort
    ///
    /// Each close is attempted independently; failures are logged and the
    /// registry is left empty and closed either way. Returns how many closed
    /// cleanly.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(String, Arc<dyn BrokerConnection>)> = {
            let mut connections = self.connections.write().await;
            self.closed.store(true, Ordering::Release);
            connections.drain().collect()
        };

        let mut closed = 0;
        for (address, connection) in drained {
            match connection.close().await {
                Ok(()) => {
                    closed += 1;
                    debug!(broker = %address, "Broker connection closed");
                }
                Err(e) => {
                    warn!(broker = %address, error = %e, "Failed to close broker connection");
                }
            }
        }

        info!(closed = closed, "Broker connection registry closed");
        closed
    }
}
