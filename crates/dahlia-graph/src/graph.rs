use std::collections::{BTreeMap, BTreeSet};

use dahlia_node::BranchKey;
use indexmap::IndexMap;

use crate::error::GraphError;
use crate::node::GraphNode;

/// Keyed mapping from node id to [`GraphNode`], preserving insertion order.
///
/// The graph exclusively owns its wrappers and instances. It is mutated only
/// during build and pre-processing and is frozen for the duration of a run.
#[derive(Debug, Default)]
pub struct Graph {
  nodes: IndexMap<String, GraphNode>,
}

impl Graph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert a wrapper. Ids must be unique.
  pub fn add(&mut self, node: GraphNode) -> Result<(), GraphError> {
    if self.nodes.contains_key(node.id()) {
      return Err(GraphError::DuplicateNode {
        node_id: node.id().to_string(),
      });
    }
    self.nodes.insert(node.id().to_string(), node);
    Ok(())
  }

  /// Connect `from` to `to` under `key`. Both endpoints must already exist
  /// and must differ; connecting twice under the same key appends (fan-out,
  /// insertion order).
  pub fn connect(&mut self, from: &str, to: &str, key: BranchKey) -> Result<(), GraphError> {
    if from == to {
      return Err(GraphError::SelfCycle {
        node_id: from.to_string(),
      });
    }
    let missing = if !self.nodes.contains_key(from) {
      Some(from)
    } else if !self.nodes.contains_key(to) {
      Some(to)
    } else {
      None
    };
    if let Some(missing) = missing {
      return Err(GraphError::DanglingEdge {
        edge_source: from.to_string(),
        target: to.to_string(),
        missing: missing.to_string(),
      });
    }

    let node = self
      .nodes
      .get_mut(from)
      .ok_or_else(|| GraphError::UnknownNode {
        node_id: from.to_string(),
      })?;
    node.append_edge(key, to.to_string());
    Ok(())
  }

  pub fn lookup(&self, id: &str) -> Option<&GraphNode> {
    self.nodes.get(id)
  }

  pub fn next_of(&self, id: &str) -> Option<&BTreeMap<BranchKey, Vec<String>>> {
    self.nodes.get(id).map(GraphNode::next)
  }

  /// Ids of every node with an edge into `id`, computed by reverse scan.
  pub fn upstream_of(&self, id: &str) -> BTreeSet<&str> {
    self
      .nodes
      .values()
      .filter(|node| node.downstream_ids().any(|target| target == id))
      .map(GraphNode::id)
      .collect()
  }

  pub fn ids(&self) -> impl Iterator<Item = &str> {
    self.nodes.keys().map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = &GraphNode> {
    self.nodes.values()
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Structural snapshot of the adjacency, independent of instances.
  ///
  /// Two graphs built from the same description compare equal here.
  pub fn adjacency(&self) -> BTreeMap<String, BTreeMap<BranchKey, Vec<String>>> {
    self
      .nodes
      .values()
      .map(|node| (node.id().to_string(), node.next().clone()))
      .collect()
  }
}
