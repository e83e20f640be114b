//! Wire protocol between the executor and worker processes.
//!
//! One JSON object per line in each direction. A request ships the node's
//! serialized config plus the input output; the worker rebuilds the instance
//! through its own registry, runs setup (resources never cross the process
//! boundary) and executes. EOF on stdin ends the worker loop.

use dahlia_node::{NodeConfig, NodeOutput, NodeRegistry};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::PoolError;

/// One dispatched node invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
  pub config: NodeConfig,
  pub input: NodeOutput,
}

/// The worker's answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerResponse {
  Ok { output: NodeOutput },
  Err { node_id: String, message: String },
}

impl WorkerResponse {
  pub fn into_result(self) -> Result<NodeOutput, PoolError> {
    match self {
      WorkerResponse::Ok { output } => Ok(output),
      WorkerResponse::Err { node_id, message } => Err(PoolError::Node(
        dahlia_node::NodeError::execution(node_id, message),
      )),
    }
  }
}

/// Serve requests until the reader reaches EOF.
///
/// This is the body of the `worker` subcommand; it is generic over the
/// streams so the protocol is testable in-process.
pub async fn run_worker_loop<R, W>(
  registry: &NodeRegistry,
  mut reader: R,
  mut writer: W,
) -> Result<(), PoolError>
where
  R: AsyncBufRead + Unpin,
  W: AsyncWrite + Unpin,
{
  let mut line = String::new();
  loop {
    line.clear();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
      debug!("worker input closed, exiting");
      return Ok(());
    }
    if line.trim().is_empty() {
      continue;
    }

    let response = handle_line(registry, &line).await;
    let mut payload = serde_json::to_string(&response)?;
    payload.push('\n');
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await?;
  }
}

async fn handle_line(registry: &NodeRegistry, line: &str) -> WorkerResponse {
  let request: WorkerRequest = match serde_json::from_str(line) {
    Ok(request) => request,
    Err(e) => {
      return WorkerResponse::Err {
        node_id: String::new(),
        message: format!("malformed worker request: {e}"),
      };
    }
  };

  let node_id = request.config.id.clone();
  let node = match registry.create(request.config) {
    Ok(node) => node,
    Err(e) => {
      return WorkerResponse::Err {
        node_id,
        message: e.to_string(),
      };
    }
  };

  if let Err(e) = node.initialize().await {
    return WorkerResponse::Err {
      node_id,
      message: e.to_string(),
    };
  }

  match node.run(request.input).await {
    Ok(output) => WorkerResponse::Ok { output },
    Err(e) => WorkerResponse::Err {
      node_id,
      message: e.to_string(),
    },
  }
}
