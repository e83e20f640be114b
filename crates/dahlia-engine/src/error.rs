//! Error types for workflow orchestration.

use dahlia_broker::BrokerError;
use dahlia_graph::GraphError;
use dahlia_node::NodeError;
use dahlia_pool::PoolError;
use thiserror::Error;

/// Errors that can occur while loading or executing a workflow.
#[derive(Debug, Error)]
pub enum EngineError {
  /// The description could not be materialized (unknown type, dangling
  /// edge). The workflow is rejected.
  #[error("failed to build workflow: {0}")]
  Build(#[from] GraphError),

  /// One or more validators rejected the workflow.
  #[error("workflow validation failed: {report}")]
  Validation { report: String },

  /// A pre-processor failed while mutating the graph.
  #[error("pre-processor '{name}' failed: {message}")]
  Preprocess { name: String, message: String },

  /// A node failed outside of pool dispatch.
  #[error(transparent)]
  Node(#[from] NodeError),

  /// Pool dispatch failed (carries node failures as well).
  #[error(transparent)]
  Pool(#[from] PoolError),

  /// The messaging substrate was unavailable.
  #[error("broker unavailable: {0}")]
  Broker(#[from] BrokerError),

  /// A referenced node is missing from the graph.
  #[error("node '{node_id}' not found in graph")]
  MissingNode { node_id: String },

  /// A spawned loop task failed to join.
  #[error("loop task failed: {message}")]
  Task { message: String },

  /// Execution was cancelled; a normal, graceful exit.
  #[error("execution cancelled")]
  Cancelled,
}

impl EngineError {
  pub fn validation(report: impl Into<String>) -> Self {
    EngineError::Validation {
      report: report.into(),
    }
  }
}
