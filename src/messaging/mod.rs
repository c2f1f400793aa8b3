//! # Messaging Module
//!
//! Broker plumbing for the orchestration engine.
//!
//! ```text
//! MessagingGateway              <- send_to_queue / publish_event
//!   ├── BrokerConnectionRegistry  (one cached session per address string)
//!   │     └── dyn BrokerConnector -> dyn BrokerConnection
//!   │           ├── InMemoryBrokerHub / InMemoryConnection
//!   │           └── PgmqConnector / PgmqConnection   (feature "pgmq")
//!   └── EventPublisher            (broadcast fan-out)
//! ```

pub mod connection;
pub mod errors;
pub mod gateway;
pub mod providers;
pub mod registry;
pub mod types;

pub use connection::{BrokerConnection, BrokerConnector};
pub use errors::{MessagingError, MessagingResult};
pub use gateway::MessagingGateway;
pub use registry::BrokerConnectionRegistry;
pub use types::{DeliveryMode, MessageId, QueueStats, ReceiptHandle, ReceivedMessage};
