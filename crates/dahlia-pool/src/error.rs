//! Error types for pool dispatch.

use dahlia_node::NodeError;
use thiserror::Error;

/// Errors that can occur while dispatching a node invocation.
#[derive(Debug, Error)]
pub enum PoolError {
  /// The node itself failed; carries the node-level error unchanged.
  #[error(transparent)]
  Node(#[from] NodeError),

  /// The worker thread pool has been shut down.
  #[error("worker thread pool is shut down")]
  ThreadPoolClosed,

  /// The process pool cannot be used (no worker command, shut down).
  #[error("worker process pool unavailable: {message}")]
  ProcessPoolUnavailable { message: String },

  /// A worker process violated the wire protocol.
  #[error("worker protocol error: {message}")]
  Protocol { message: String },

  #[error("worker io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}
