use std::collections::BTreeMap;
use std::sync::Arc;

use dahlia_node::{BranchKey, Node};

/// A node wrapper inside a graph: the live instance plus branch-keyed
/// outbound adjacency.
///
/// `next` maps a branch key to the ordered list of downstream node ids;
/// duplicates under one key are allowed (fan-out) and preserve insertion
/// order.
pub struct GraphNode {
  id: String,
  instance: Arc<dyn Node>,
  next: BTreeMap<BranchKey, Vec<String>>,
}

impl GraphNode {
  pub fn new(instance: Arc<dyn Node>) -> Self {
    Self {
      id: instance.config().id.clone(),
      instance,
      next: BTreeMap::new(),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn instance(&self) -> &Arc<dyn Node> {
    &self.instance
  }

  pub fn next(&self) -> &BTreeMap<BranchKey, Vec<String>> {
    &self.next
  }

  /// All downstream ids across every branch, in (key order × insertion
  /// order).
  pub fn downstream_ids(&self) -> impl Iterator<Item = &str> {
    self.next.values().flatten().map(String::as_str)
  }

  pub(crate) fn append_edge(&mut self, key: BranchKey, target: String) {
    self.next.entry(key).or_default().push(target);
  }
}

impl std::fmt::Debug for GraphNode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GraphNode")
      .field("id", &self.id)
      .field("type", &self.instance.identifier())
      .field("next", &self.next)
      .finish()
  }
}
