//! # System Constants
//!
//! Queue ids, metadata keys and context flags shared between the dispatcher,
//! the conveyor belt and the standard decision function.

/// Queue the dispatcher listens on when none is configured
pub const DEFAULT_LISTEN_QUEUE: &str = "transactionManager";

/// Broker address used when none is configured
pub const DEFAULT_BROKER_ADDRESS: &str = "localhost:61616";

/// Processing stages understood by the conveyor belt
pub mod stages {
    /// Transformers run when an object is harvested
    pub const HARVEST: &str = "harvestQueue";
    /// Transformers run when an object is rendered for display
    pub const RENDER: &str = "renderQueue";
}

/// Metadata keys and flags the engine itself defines on digital objects
pub mod metadata {
    /// Flag marking an object for the user-priority chain
    pub const USER_PRIORITY: &str = "userPriority";
    /// Synthetic chain id emitted when the user-priority flag is consumed
    pub const USER_PRIORITY_SELECTOR: &str = "userPriority";
}

/// Well-known keys inside a message context
pub mod context {
    pub const DELETED: &str = "deleted";
    pub const LOOP_STOP: &str = "loopStop";
    pub const STAGE: &str = "stage";
    pub const COMMIT: &str = "commit";
    pub const RELATED_OIDS: &str = "relatedOids";
    pub const EVENT_TYPE: &str = "eventType";
}

/// Names of lifecycle events published through the messaging gateway
pub mod events {
    pub const MESSAGE_DISCARDED: &str = "message_discarded";
    pub const DECISION_FAILED: &str = "decision_failed";
    pub const ORDER_FAILED: &str = "order_failed";
    pub const MESSAGE_COMPLETED: &str = "message_completed";
}
