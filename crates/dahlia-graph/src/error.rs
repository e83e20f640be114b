//! Error types for graph construction.

use dahlia_node::NodeError;
use thiserror::Error;

/// Errors raised while building or mutating a graph.
#[derive(Debug, Error)]
pub enum GraphError {
  /// Two node definitions share one id.
  #[error("duplicate node id '{node_id}'")]
  DuplicateNode { node_id: String },

  /// An edge references a node that is not in the graph.
  #[error("edge '{edge_source}' -> '{target}' references missing node '{missing}'")]
  DanglingEdge {
    edge_source: String,
    target: String,
    missing: String,
  },

  /// A node connects directly to itself. Cycles are logical (the scheduler's
  /// outer loop, or queues), never physical edges.
  #[error("node '{node_id}' cannot connect to itself")]
  SelfCycle { node_id: String },

  /// The requested node does not exist.
  #[error("node '{node_id}' not found in graph")]
  UnknownNode { node_id: String },

  /// Instantiation failed (unknown type, bad config).
  #[error(transparent)]
  Node(#[from] NodeError),
}
