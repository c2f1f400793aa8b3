//! # Event Publishing
//!
//! Broadcast fan-out used by the messaging gateway's `publish_event` for
//! audit-log style listeners.

pub mod publisher;

pub use publisher::{EventPublisher, PublishedEvent};
