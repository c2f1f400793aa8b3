//! # Digital Object
//!
//! The unit of content the engine processes. Owned by the storage
//! collaborator; the engine reads and writes metadata flags and payload
//! existence only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalObject {
    pub id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub payloads: BTreeMap<String, Vec<u8>>,
}

impl DigitalObject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<String> {
        self.metadata.remove(key)
    }

    /// True when the property is present and reads as `"true"`
    pub fn has_flag(&self, key: &str) -> bool {
        self.get_property(key)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn has_payload(&self, name: &str) -> bool {
        self.payloads.contains_key(name)
    }

    pub fn add_payload(&mut self, name: impl Into<String>, content: Vec<u8>) {
        self.payloads.insert(name.into(), content);
    }
}
