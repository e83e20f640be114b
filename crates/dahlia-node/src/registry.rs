use std::collections::HashMap;
use std::sync::Arc;

use crate::config::NodeConfig;
use crate::contract::{Node, NodeVariant, PoolKind};
use crate::error::NodeError;

/// Class-level facts about a node type, available without instantiation.
///
/// Mode detection needs to know whether a type is a producer before any
/// instance exists, so factories register a descriptor alongside themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
  pub identifier: String,
  pub variant: NodeVariant,
  pub preferred_pool: PoolKind,
}

impl NodeDescriptor {
  pub fn new(identifier: impl Into<String>, variant: NodeVariant) -> Self {
    Self {
      identifier: identifier.into(),
      variant,
      preferred_pool: PoolKind::Cooperative,
    }
  }

  pub fn with_pool(mut self, pool: PoolKind) -> Self {
    self.preferred_pool = pool;
    self
  }
}

type Factory = Box<dyn Fn(NodeConfig) -> Result<Arc<dyn Node>, NodeError> + Send + Sync>;

struct Entry {
  descriptor: NodeDescriptor,
  factory: Factory,
}

/// Registry of node implementations keyed by their identifier.
///
/// Adding a node type is a registration, not a conditional anywhere else in
/// the engine. Defaults are registered at startup by the node catalog crate.
#[derive(Default)]
pub struct NodeRegistry {
  entries: HashMap<String, Entry>,
}

impl NodeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a node type. A later registration under the same identifier
  /// replaces the earlier one.
  pub fn register<F>(&mut self, descriptor: NodeDescriptor, factory: F)
  where
    F: Fn(NodeConfig) -> Result<Arc<dyn Node>, NodeError> + Send + Sync + 'static,
  {
    self.entries.insert(
      descriptor.identifier.clone(),
      Entry {
        descriptor,
        factory: Box::new(factory),
      },
    );
  }

  /// Instantiate a node from its config, keyed by `config.node_type`.
  pub fn create(&self, config: NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
    let entry = self
      .entries
      .get(&config.node_type)
      .ok_or_else(|| NodeError::UnknownType {
        node_id: config.id.clone(),
        node_type: config.node_type.clone(),
      })?;
    (entry.factory)(config)
  }

  pub fn descriptor(&self, node_type: &str) -> Option<&NodeDescriptor> {
    self.entries.get(node_type).map(|entry| &entry.descriptor)
  }

  pub fn contains(&self, node_type: &str) -> bool {
    self.entries.contains_key(node_type)
  }

  /// All registered identifiers, sorted.
  pub fn identifiers(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
    ids.sort_unstable();
    ids
  }
}

impl std::fmt::Debug for NodeRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NodeRegistry")
      .field("identifiers", &self.identifiers())
      .finish()
  }
}
