//! # Decision Functions
//!
//! A decision function maps one [`Message`] to the [`OrderBatch`] that should
//! run for it. It decides; it never executes. The dispatcher owns execution,
//! so policy can change without touching the engine and a batch can be
//! asserted on directly in tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::constants::{context, stages};
use crate::models::{Message, Order, OrderBatch};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecisionError {
    #[error("Decision function '{function}' failed for '{oid}': {message}")]
    Failed {
        function: String,
        oid: String,
        message: String,
    },

    #[error("Context field '{field}' of '{oid}' is invalid: {message}")]
    InvalidContext {
        oid: String,
        field: String,
        message: String,
    },
}

impl DecisionError {
    pub fn failed(
        function: impl Into<String>,
        oid: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Failed {
            function: function.into(),
            oid: oid.into(),
            message: message.into(),
        }
    }

    pub fn invalid_context(
        oid: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidContext {
            oid: oid.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type DecisionResult<T> = Result<T, DecisionError>;

/// Pluggable policy: what should happen to this object?
///
/// Implementations must be deterministic for the same message and reference
/// data, must not block indefinitely and must not perform the orders
/// themselves. Returning an error aborts the whole message.
#[async_trait]
pub trait DecisionFunction: Send + Sync {
    fn name(&self) -> &str {
        "decision_function"
    }

    async fn evaluate(&self, message: &Message) -> DecisionResult<OrderBatch>;
}

/// Adapts a plain closure into a [`DecisionFunction`]
pub struct FnDecisionFunction<F> {
    name: String,
    decide: F,
}

impl<F> FnDecisionFunction<F>
where
    F: Fn(&Message) -> DecisionResult<OrderBatch> + Send + Sync,
{
    pub fn new(name: impl Into<String>, decide: F) -> Self {
        Self {
            name: name.into(),
            decide,
        }
    }
}

#[async_trait]
impl<F> DecisionFunction for FnDecisionFunction<F>
where
    F: Fn(&Message) -> DecisionResult<OrderBatch> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, message: &Message) -> DecisionResult<OrderBatch> {
        (self.decide)(message)
    }
}

impl<F> std::fmt::Debug for FnDecisionFunction<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnDecisionFunction")
            .field("name", &self.name)
            .finish()
    }
}

/// Ready-made transaction manager for the usual harvest lifecycle
///
/// - `deleted` objects are re-indexed with a commit and a `delete` event is
///   broadcast.
/// - Everything else runs the transformer chain for `context.stage` (or the
///   default stage), is indexed (committing when `context.commit` is set) and
///   a `modify` event is broadcast.
/// - Each id in `context.relatedOids` gets its own cascaded message marked
///   with `loopStop`; a message that already carries `loopStop` cascades no
///   further.
#[derive(Debug, Clone)]
pub struct StandardTransactionManager {
    default_stage: String,
}

impl StandardTransactionManager {
    pub fn new(default_stage: impl Into<String>) -> Self {
        Self {
            default_stage: default_stage.into(),
        }
    }

    pub fn default_stage(&self) -> &str {
        &self.default_stage
    }

    fn related_oids(message: &Message) -> DecisionResult<Vec<String>> {
        let Some(related) = message.context.get(context::RELATED_OIDS) else {
            return Ok(Vec::new());
        };

        let Value::Array(related) = related else {
            return Err(DecisionError::invalid_context(
                &message.oid,
                context::RELATED_OIDS,
                "expected an array of object ids",
            ));
        };

        related
            .iter()
            .map(|oid| match oid.as_str() {
                Some(oid) if !oid.trim().is_empty() => Ok(oid.to_string()),
                _ => Err(DecisionError::invalid_context(
                    &message.oid,
                    context::RELATED_OIDS,
                    format!("not an object id: {oid}"),
                )),
            })
            .collect()
    }
}

impl Default for StandardTransactionManager {
    fn default() -> Self {
        Self::new(stages::HARVEST)
    }
}

#[async_trait]
impl DecisionFunction for StandardTransactionManager {
    fn name(&self) -> &str {
        "standard_transaction_manager"
    }

    async fn evaluate(&self, message: &Message) -> DecisionResult<OrderBatch> {
        let oid = message.oid.as_str();
        let mut batch = OrderBatch::empty();

        if message.flag(context::DELETED) {
            batch.push(Order::index(oid).with_config(json!({ (context::COMMIT): true })));
            batch.push(Order::notify(
                oid,
                json!({ (context::EVENT_TYPE): "delete" }),
            ));
        } else {
            let stage = message
                .context_str(context::STAGE)
                .filter(|stage| !stage.trim().is_empty())
                .unwrap_or(&self.default_stage);

            batch.push(Order::transform(oid, stage, json!({})));
            batch.push(
                Order::index(oid)
                    .with_config(json!({ (context::COMMIT): message.flag(context::COMMIT) })),
            );
            batch.push(Order::notify(
                oid,
                json!({ (context::EVENT_TYPE): "modify" }),
            ));
        }

        let related = Self::related_oids(message)?;
        if !message.flag(context::LOOP_STOP) {
            for related_oid in related {
                batch.push(Order::dispatch(json!({
                    "oid": related_oid,
                    (context::LOOP_STOP): true,
                })));
            }
        }

        Ok(batch)
    }
}
