use std::sync::{PoisonError, RwLock};

use dahlia_config::{NodeData, NodeDef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Wiring-config key naming the queue a queue endpoint talks to. Written by
/// the engine's queue-naming pre-processor, read by queue reader/writer nodes.
pub const QUEUE_NAME_KEY: &str = "queue_name";

/// Runtime descriptor of a node instance.
///
/// Mirrors the description-layer [`NodeDef`] but keeps the `config` wiring
/// bag behind a lock so pre-processors can write wiring hints (queue names)
/// into an already-built graph. After pre-processing the graph is frozen and
/// the bag is only read.
#[derive(Debug)]
pub struct NodeConfig {
  pub id: String,
  pub node_type: String,
  pub form: Map<String, Value>,
  wiring: RwLock<Map<String, Value>>,
}

impl NodeConfig {
  pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      node_type: node_type.into(),
      form: Map::new(),
      wiring: RwLock::new(Map::new()),
    }
  }

  pub fn with_form(mut self, form: Map<String, Value>) -> Self {
    self.form = form;
    self
  }

  /// Read a wiring hint by key.
  pub fn wiring_get(&self, key: &str) -> Option<Value> {
    self
      .wiring
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(key)
      .cloned()
  }

  /// Write a wiring hint, overwriting any previous value.
  pub fn wiring_set(&self, key: impl Into<String>, value: Value) {
    self
      .wiring
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key.into(), value);
  }

  /// Write a wiring hint only if the key is not already present.
  ///
  /// Returns whether the value was written.
  pub fn wiring_set_if_absent(&self, key: &str, value: Value) -> bool {
    let mut wiring = self.wiring.write().unwrap_or_else(PoisonError::into_inner);
    if wiring.contains_key(key) {
      return false;
    }
    wiring.insert(key.to_string(), value);
    true
  }

  pub fn wiring_snapshot(&self) -> Map<String, Value> {
    self
      .wiring
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Read a form field as a string slice.
  pub fn form_str(&self, key: &str) -> Option<&str> {
    self.form.get(key).and_then(Value::as_str)
  }
}

impl From<&NodeDef> for NodeConfig {
  fn from(def: &NodeDef) -> Self {
    Self {
      id: def.id.clone(),
      node_type: def.node_type.clone(),
      form: def.data.form.clone(),
      wiring: RwLock::new(def.data.config.clone()),
    }
  }
}

impl Clone for NodeConfig {
  fn clone(&self) -> Self {
    Self {
      id: self.id.clone(),
      node_type: self.node_type.clone(),
      form: self.form.clone(),
      wiring: RwLock::new(self.wiring_snapshot()),
    }
  }
}

impl PartialEq for NodeConfig {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
      && self.node_type == other.node_type
      && self.form == other.form
      && self.wiring_snapshot() == other.wiring_snapshot()
  }
}

impl From<&NodeConfig> for NodeDef {
  fn from(config: &NodeConfig) -> Self {
    NodeDef {
      id: config.id.clone(),
      node_type: config.node_type.clone(),
      data: NodeData {
        form: config.form.clone(),
        config: config.wiring_snapshot(),
      },
    }
  }
}

impl Serialize for NodeConfig {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    NodeDef::from(self).serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for NodeConfig {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let def = NodeDef::deserialize(deserializer)?;
    Ok(NodeConfig::from(&def))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn set_if_absent_does_not_overwrite() {
    let config = NodeConfig::new("write", "queue-writer");
    assert!(config.wiring_set_if_absent("queue_name", json!("queue_a_b")));
    assert!(!config.wiring_set_if_absent("queue_name", json!("queue_x_y")));
    assert_eq!(config.wiring_get("queue_name"), Some(json!("queue_a_b")));
  }

  #[test]
  fn serializes_in_description_shape() {
    let config = NodeConfig::new("write", "queue-writer");
    config.wiring_set("queue_name", json!("queue_a_b"));

    let value = serde_json::to_value(&config).unwrap();
    assert_eq!(value["id"], json!("write"));
    assert_eq!(value["type"], json!("queue-writer"));
    assert_eq!(value["data"]["config"]["queue_name"], json!("queue_a_b"));

    let back: NodeConfig = serde_json::from_value(value).unwrap();
    assert_eq!(back, config);
  }
}
