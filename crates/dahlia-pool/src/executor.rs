use std::sync::{Arc, OnceLock};

use dahlia_node::{Node, NodeOutput, PoolKind};
use tracing::debug;

use crate::error::PoolError;
use crate::process_pool::{ProcessPool, WorkerCommand};
use crate::thread_pool::WorkerThreadPool;

/// Sizing and wiring for the backends.
#[derive(Debug, Clone)]
pub struct PoolConfig {
  pub thread_workers: usize,
  pub process_workers: usize,
  /// How to start worker processes. With `None` the worker-process backend
  /// is unavailable and dispatching to it is an error.
  pub worker_command: Option<WorkerCommand>,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      thread_workers: 4,
      process_workers: 2,
      worker_command: None,
    }
  }
}

/// Dispatches one node invocation to the backend a caller selected.
///
/// Backends initialize lazily on first use; `shutdown` tears them down,
/// waiting for in-flight jobs unless forced.
pub struct PoolExecutor {
  config: PoolConfig,
  threads: OnceLock<WorkerThreadPool>,
  processes: OnceLock<ProcessPool>,
}

impl PoolExecutor {
  pub fn new(config: PoolConfig) -> Self {
    Self {
      config,
      threads: OnceLock::new(),
      processes: OnceLock::new(),
    }
  }

  /// Run `node` on the given backend and await its output.
  pub async fn run(
    &self,
    pool: PoolKind,
    node: Arc<dyn Node>,
    input: NodeOutput,
  ) -> Result<NodeOutput, PoolError> {
    match pool {
      PoolKind::Cooperative => Ok(node.run(input).await?),
      PoolKind::WorkerThread => {
        let threads = self
          .threads
          .get_or_init(|| WorkerThreadPool::new(self.config.thread_workers));
        threads.run(node, input).await
      }
      PoolKind::WorkerProcess => {
        let processes = self.process_pool()?;
        processes.run(node.config(), input).await
      }
    }
  }

  fn process_pool(&self) -> Result<&ProcessPool, PoolError> {
    if let Some(pool) = self.processes.get() {
      return Ok(pool);
    }
    let command = self
      .config
      .worker_command
      .clone()
      .ok_or_else(|| PoolError::ProcessPoolUnavailable {
        message: "no worker command configured".to_string(),
      })?;
    Ok(
      self
        .processes
        .get_or_init(|| ProcessPool::new(command, self.config.process_workers)),
    )
  }

  /// Tear down whichever backends were actually created.
  pub async fn shutdown(&self, force: bool) {
    debug!(force, "shutting down pools");
    if let Some(threads) = self.threads.get() {
      threads.shutdown(!force);
    }
    if let Some(processes) = self.processes.get() {
      processes.shutdown(force).await;
    }
  }
}

impl std::fmt::Debug for PoolExecutor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PoolExecutor")
      .field("config", &self.config)
      .finish()
  }
}
