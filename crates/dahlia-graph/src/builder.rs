//! Materializes a graph from a declarative workflow description.

use dahlia_config::WorkflowDef;
use dahlia_node::{BranchKey, NodeConfig, NodeRegistry};

use crate::error::GraphError;
use crate::graph::Graph;
use crate::node::GraphNode;

/// Build a runtime graph from a description.
///
/// Every node is instantiated through the registry keyed by its `type`, then
/// every edge's `sourceHandle` is normalized into a branch key and connected.
/// Unknown types and dangling edges fail fast, naming the offender.
pub fn build(def: &WorkflowDef, registry: &NodeRegistry) -> Result<Graph, GraphError> {
  let mut graph = Graph::new();

  for node_def in &def.nodes {
    let instance = registry.create(NodeConfig::from(node_def))?;
    graph.add(GraphNode::new(instance))?;
  }

  for edge in &def.edges {
    let key = BranchKey::normalize(edge.source_handle.as_deref());
    graph.connect(&edge.source, &edge.target, key)?;
  }

  Ok(graph)
}
