//! Pure analysis queries over a frozen graph.
//!
//! The analyzer never mutates. Traversals stop at producer boundaries: a
//! producer found downstream of another node owns its own loop and receives
//! its inputs through a queue, not through the edge.

use std::collections::{HashSet, VecDeque};

use dahlia_node::{NodeVariant, PoolKind};

use crate::graph::Graph;
use crate::node::GraphNode;

/// All producer nodes, in insertion order.
pub fn producers(graph: &Graph) -> Vec<&GraphNode> {
  graph
    .iter()
    .filter(|node| node.instance().variant() == NodeVariant::Producer)
    .collect()
}

/// Ids of nodes with no incoming edges, in insertion order.
pub fn entry_ids(graph: &Graph) -> Vec<&str> {
  graph
    .iter()
    .map(GraphNode::id)
    .filter(|id| graph.upstream_of(id).is_empty())
    .collect()
}

/// All non-blocking terminator nodes, in insertion order.
pub fn terminators(graph: &Graph) -> Vec<&GraphNode> {
  graph
    .iter()
    .filter(|node| node.instance().variant() == NodeVariant::NonBlocking)
    .collect()
}

/// Breadth-first traversal collecting the subgraph induced by `start`.
///
/// Returns ids in visit order, `start` first. Producers other than `start`
/// are not entered - they belong to their own loops.
pub fn chain(graph: &Graph, start: &str) -> Vec<String> {
  let mut visited: HashSet<&str> = HashSet::new();
  let mut order: Vec<String> = Vec::new();
  let mut queue: VecDeque<&str> = VecDeque::new();

  let Some(origin) = graph.lookup(start) else {
    return order;
  };
  visited.insert(origin.id());
  order.push(origin.id().to_string());
  queue.push_back(origin.id());

  while let Some(current) = queue.pop_front() {
    let Some(node) = graph.lookup(current) else {
      continue;
    };
    for target in node.downstream_ids() {
      if visited.contains(target) {
        continue;
      }
      let Some(child) = graph.lookup(target) else {
        continue;
      };
      if child.instance().variant() == NodeVariant::Producer {
        continue;
      }
      visited.insert(child.id());
      order.push(child.id().to_string());
      queue.push_back(child.id());
    }
  }

  order
}

/// The pool an iteration over `ids` must run on: the max preference by
/// escalation priority across all touched nodes.
pub fn iteration_pool<'a>(graph: &Graph, ids: impl IntoIterator<Item = &'a str>) -> PoolKind {
  ids
    .into_iter()
    .filter_map(|id| graph.lookup(id))
    .map(|node| node.instance().preferred_pool())
    .max()
    .unwrap_or(PoolKind::Cooperative)
}
