//! # Orchestration Engine
//!
//! Decides and executes work for digital objects arriving on queues.
//!
//! ## Core Components
//!
//! - **DecisionFunction**: pluggable policy, one message in, one order batch out
//! - **QueueDispatcher**: executes a batch in order, isolating each order
//! - **ConveyorBelt**: resolves and runs the transformer chain for a stage
//! - **IsolatedStepRunner**: the shared try/log/continue loop
//! - **QueueConsumer**: one task per queue feeding the dispatcher
//! - **CurationEngine**: bootstrap and shutdown of all of the above
//!
//! Message flow:
//!
//! ```text
//! queue -> QueueConsumer -> QueueDispatcher::on_message
//!                              |-> DecisionFunction::evaluate -> OrderBatch
//!                              |-> Transform -> ConveyorBelt / single transformer -> ObjectStore
//!                              |-> Index     -> Indexer
//!                              |-> Notify    -> SubscriberRegistry + publish_event
//!                              +-> Dispatch  -> MessagingGateway -> (another) queue
//! ```

pub mod consumer;
pub mod conveyor;
pub mod decision;
pub mod dispatcher;
pub mod engine;
pub mod isolation;

pub use consumer::{ConsumerHandle, ConsumerStats, ConsumerStatsSnapshot, QueueConsumer};
pub use conveyor::{
    describe_stages, ChainContext, ChainOutcome, ChainSource, ConveyorBelt, TransformerChain,
};
pub use decision::{
    DecisionError, DecisionFunction, DecisionResult, FnDecisionFunction,
    StandardTransactionManager,
};
pub use dispatcher::{
    notification_fields, DispatcherContext, MessageOutcome, OrderEffect, OrderError,
    QueueDispatcher,
};
pub use engine::{CurationEngine, ShutdownReport};
pub use isolation::{IsolatedStepRunner, StepFailure, StepReport};
