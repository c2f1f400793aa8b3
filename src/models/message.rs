//! # Message Envelope
//!
//! The immutable envelope delivered on a queue: an object id plus a free-form
//! context map. On the wire the context is flattened next to `oid`:
//!
//! ```text
//! {"oid": "uuid:1234", "deleted": true, "userPriority": "true"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::messaging::{MessagingError, MessagingResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identifies the digital object under discussion
    pub oid: String,
    /// Free-form flags interpreted by collaborators
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl Message {
    pub fn new(oid: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Build a message from a JSON payload, taking `oid` from the payload when
    /// present and from `fallback_oid` otherwise.
    ///
    /// Every other payload field becomes context.
    pub fn from_payload(payload: &Value, fallback_oid: &str) -> Self {
        let mut context = match payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };

        let oid = match context.remove("oid") {
            Some(Value::String(oid)) if !oid.trim().is_empty() => oid,
            _ => fallback_oid.to_string(),
        };

        Self { oid, context }
    }

    /// Parse a raw queue body
    ///
    /// Rejects anything that is not a JSON object with a non-empty string `oid`.
    pub fn parse(raw: &[u8]) -> MessagingResult<Self> {
        let value: Value = serde_json::from_slice(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> MessagingResult<Self> {
        let Value::Object(mut map) = value else {
            return Err(MessagingError::message_deserialization(
                "message body must be a JSON object",
            ));
        };

        let oid = match map.remove("oid") {
            Some(Value::String(oid)) if !oid.trim().is_empty() => oid,
            Some(Value::String(_)) => {
                return Err(MessagingError::message_deserialization("oid is empty"))
            }
            Some(other) => {
                return Err(MessagingError::message_deserialization(format!(
                    "oid must be a string, got {other}"
                )))
            }
            None => return Err(MessagingError::message_deserialization("missing oid")),
        };

        Ok(Self { oid, context: map })
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.context.clone();
        map.insert("oid".to_string(), Value::String(self.oid.clone()));
        Value::Object(map)
    }

    /// True when the context flag is JSON `true` or the string `"true"`
    pub fn flag(&self, name: &str) -> bool {
        match self.context.get(name) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(flag)) => flag.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn context_str(&self, name: &str) -> Option<&str> {
        self.context.get(name).and_then(Value::as_str)
    }
}
