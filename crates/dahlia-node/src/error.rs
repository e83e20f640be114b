//! Error types for node construction and execution.

use thiserror::Error;

/// Errors that can occur while building or running a node.
#[derive(Debug, Error)]
pub enum NodeError {
  /// Structural configuration check failed.
  #[error("node '{node_id}' is not ready: {report}")]
  NotReady { node_id: String, report: String },

  /// A form template failed to render or re-validate.
  #[error("template resolution failed for node '{node_id}' field '{field}': {message}")]
  Template {
    node_id: String,
    field: String,
    message: String,
  },

  /// Arbitrary failure inside the node body.
  #[error("execution failed for node '{node_id}': {message}")]
  Execution { node_id: String, message: String },

  /// The backing store (queue, cache, pub/sub) was unavailable.
  #[error("transport failure in node '{node_id}': {message}")]
  Transport { node_id: String, message: String },

  /// The registry has no implementation for the requested type.
  #[error("unknown node type '{node_type}' for node '{node_id}'")]
  UnknownType { node_id: String, node_type: String },

  /// An output could not be encoded or decoded.
  #[error("serialization failed for node '{node_id}': {source}")]
  Serialization {
    node_id: String,
    #[source]
    source: serde_json::Error,
  },
}

impl NodeError {
  /// Convenience constructor for execution failures.
  pub fn execution(node_id: impl Into<String>, message: impl Into<String>) -> Self {
    NodeError::Execution {
      node_id: node_id.into(),
      message: message.into(),
    }
  }

  /// Convenience constructor for transport failures.
  pub fn transport(node_id: impl Into<String>, message: impl Into<String>) -> Self {
    NodeError::Transport {
      node_id: node_id.into(),
      message: message.into(),
    }
  }
}
