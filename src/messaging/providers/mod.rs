//! Broker provider implementations

pub mod in_memory;
#[cfg(feature = "pgmq")]
pub mod pgmq;

pub use in_memory::{InMemoryBroker, InMemoryBrokerHub, InMemoryConnection, InMemoryQueue};
#[cfg(feature = "pgmq")]
pub use self::pgmq::{PgmqConnection, PgmqConnector};

use std::sync::Arc;

use super::connection::BrokerConnector;
use super::MessagingResult;
use crate::config::BrokerProvider;

/// Connector for the configured provider
///
/// `pgmq` needs the crate feature of the same name.
pub fn connector_for(provider: BrokerProvider) -> MessagingResult<Arc<dyn BrokerConnector>> {
    match provider {
        BrokerProvider::InMemory => Ok(Arc::new(InMemoryBrokerHub::new())),
        #[cfg(feature = "pgmq")]
        BrokerProvider::Pgmq => Ok(Arc::new(PgmqConnector::new())),
        #[cfg(not(feature = "pgmq"))]
        BrokerProvider::Pgmq => Err(super::MessagingError::configuration(
            "broker.provider",
            "pgmq support is not compiled in; enable the `pgmq` feature",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(not(feature = "pgmq"))]
    use crate::messaging::MessagingError;

    #[test]
    fn test_in_memory_connector_for_default_provider() {
        let connector = connector_for(BrokerProvider::default()).unwrap();
        assert_eq!(connector.provider_name(), "in_memory");
    }

    #[cfg(not(feature = "pgmq"))]
    #[test]
    fn test_pgmq_requires_feature() {
        let err = connector_for(BrokerProvider::Pgmq).unwrap_err();
        assert!(matches!(err, MessagingError::Configuration { .. }));
    }
}
