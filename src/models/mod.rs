//! # Data Model
//!
//! Messages delivered on queues, the orders a decision function emits for
//! them, and the digital objects those orders act on.

pub mod digital_object;
pub mod message;
pub mod order;

pub use digital_object::DigitalObject;
pub use message::Message;
pub use order::{Order, OrderBatch, OrderType};
