//! # Orders and Order Batches
//!
//! One unit of work emitted by a decision function. Batch position is
//! execution position.
//!
//! Wire format:
//!
//! ```text
//! {"orders":[{"type":"TRANSFORMER","oid":"uuid:1","target":"ice2","config":{}},
//!            {"type":"INDEXER","oid":"uuid:1"},
//!            {"type":"SUBSCRIBER","oid":"uuid:1","message":{"eventType":"modify"}},
//!            {"type":"MESSAGE","target":"renderQueue","message":{"oid":"uuid:2"},
//!             "broker":"tcp://backup:61616"}]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Run a transformer (or a whole conveyor stage) against the object
    #[serde(rename = "TRANSFORMER")]
    Transform,
    /// Hand the object to the indexing collaborator
    #[serde(rename = "INDEXER")]
    Index,
    /// Broadcast the payload to every subscriber
    #[serde(rename = "SUBSCRIBER")]
    Notify,
    /// Send a brand-new message to a queue, possibly on another broker
    #[serde(rename = "MESSAGE")]
    Dispatch,
}

impl OrderType {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Transform => "TRANSFORMER",
            Self::Index => "INDEXER",
            Self::Notify => "SUBSCRIBER",
            Self::Dispatch => "MESSAGE",
        }
    }

    /// Whether orders of this type must name an object
    pub fn requires_oid(&self) -> bool {
        !matches!(self, Self::Dispatch)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "type")]
    pub order_type: OrderType,

    #[serde(rename = "oid", default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    /// Transformer id / conveyor stage (Transform), indexer id (Index) or
    /// destination queue (Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Passed verbatim to a transformer
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,

    /// Context of the new message (Dispatch) or the notification fields (Notify)
    #[serde(rename = "message", default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,

    #[serde(rename = "broker", default, skip_serializing_if = "Option::is_none")]
    pub broker_override: Option<String>,
}

impl Order {
    fn new(order_type: OrderType) -> Self {
        Self {
            order_type,
            object_id: None,
            target: None,
            config: Value::Null,
            payload: Value::Null,
            broker_override: None,
        }
    }

    pub fn transform(oid: impl Into<String>, target: impl Into<String>, config: Value) -> Self {
        Self {
            object_id: Some(oid.into()),
            target: Some(target.into()),
            config,
            ..Self::new(OrderType::Transform)
        }
    }

    pub fn index(oid: impl Into<String>) -> Self {
        Self {
            object_id: Some(oid.into()),
            ..Self::new(OrderType::Index)
        }
    }

    pub fn notify(oid: impl Into<String>, payload: Value) -> Self {
        Self {
            object_id: Some(oid.into()),
            payload,
            ..Self::new(OrderType::Notify)
        }
    }

    pub fn dispatch(payload: Value) -> Self {
        Self {
            payload,
            ..Self::new(OrderType::Dispatch)
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_broker(mut self, broker: impl Into<String>) -> Self {
        self.broker_override = Some(broker.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn oid(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    /// The object this order acts on, when its type names one and the id
    /// is not blank
    pub fn subject_oid(&self) -> Option<&str> {
        if !self.order_type.requires_oid() {
            return None;
        }
        self.oid().filter(|oid| !oid.trim().is_empty())
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref().filter(|target| !target.trim().is_empty())
    }

    /// `config.commit == true` on an Index order
    pub fn wants_commit(&self) -> bool {
        self.config
            .get("commit")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Ordered sequence of orders produced for one message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBatch {
    #[serde(default)]
    pub orders: Vec<Order>,
}

impl OrderBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(orders: Vec<Order>) -> Self {
        Self { orders }
    }

    pub fn push(&mut self, order: Order) {
        self.orders.push(order);
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Order> {
        self.orders.iter()
    }

    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl FromIterator<Order> for OrderBatch {
    fn from_iter<I: IntoIterator<Item = Order>>(iter: I) -> Self {
        Self {
            orders: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for OrderBatch {
    type Item = Order;
    type IntoIter = std::vec::IntoIter<Order>;

    fn into_iter(self) -> Self::IntoIter {
        self.orders.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_parses_wire_format() {
        let batch = OrderBatch::from_json(json!({
            "orders": [
                {"type": "TRANSFORMER", "oid": "uuid:1", "target": "ice2", "config": {"mode": "fast"}},
                {"type": "INDEXER", "oid": "uuid:1", "config": {"commit": true}},
                {"type": "SUBSCRIBER", "oid": "uuid:1", "message": {"eventType": "modify"}},
                {"type": "MESSAGE", "target": "renderQueue", "message": {"oid": "uuid:2"}, "broker": "127.0.0.1:61616"}
            ]
        }))
        .unwrap();

        assert_eq!(batch.len(), 4);
        let types: Vec<OrderType> = batch.iter().map(|o| o.order_type).collect();
        assert_eq!(
            types,
            vec![
                OrderType::Transform,
                OrderType::Index,
                OrderType::Notify,
                OrderType::Dispatch
            ]
        );
        assert_eq!(batch.orders[0].config, json!({"mode": "fast"}));
        assert!(batch.orders[1].wants_commit());
        assert_eq!(batch.orders[3].oid(), None);
        assert_eq!(batch.orders[3].broker_override.as_deref(), Some("127.0.0.1:61616"));
    }

    #[test]
    fn test_unknown_order_type_is_rejected() {
        let result = OrderBatch::from_json(json!({"orders": [{"type": "DELETE", "oid": "x"}]}));
        assert!(result.is_err());
    }

    #[test]
    fn test_builders_serialize_without_empty_fields() {
        let order = Order::dispatch(json!({"oid": "B"})).with_target("harvestQueue");
        let wire = serde_json::to_value(&order).unwrap();

        assert_eq!(
            wire,
            json!({"type": "MESSAGE", "target": "harvestQueue", "message": {"oid": "B"}})
        );
    }

    #[test]
    fn test_blank_target_reads_as_absent() {
        let order = Order::dispatch(json!({})).with_target("  ");
        assert_eq!(order.target(), None);
        assert!(!OrderType::Dispatch.requires_oid());
        assert!(OrderType::Index.requires_oid());
    }

    #[test]
    fn test_subject_oid_follows_order_type() {
        assert_eq!(Order::index("uuid:1").subject_oid(), Some("uuid:1"));
        assert_eq!(Order::index(" ").subject_oid(), None);

        let mut dispatch = Order::dispatch(json!({"oid": "B"}));
        dispatch.object_id = Some("uuid:1".to_string());
        assert_eq!(dispatch.oid(), Some("uuid:1"));
        assert_eq!(dispatch.subject_oid(), None);
    }
}
