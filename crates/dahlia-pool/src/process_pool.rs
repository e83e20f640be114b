//! Bounded pool of child worker processes.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use dahlia_node::{NodeConfig, NodeOutput};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::error::PoolError;
use crate::protocol::{WorkerRequest, WorkerResponse};

/// How to start one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
  pub program: PathBuf,
  pub args: Vec<String>,
}

impl WorkerCommand {
  /// Run the current executable with the given arguments (the usual shape:
  /// the engine binary exposes a `worker` subcommand).
  pub fn current_exe(args: Vec<String>) -> std::io::Result<Self> {
    Ok(Self {
      program: std::env::current_exe()?,
      args,
    })
  }
}

struct Worker {
  child: Child,
  stdin: BufWriter<ChildStdin>,
  stdout: BufReader<ChildStdout>,
}

impl Worker {
  async fn call(&mut self, config: &NodeConfig, input: NodeOutput) -> Result<WorkerResponse, PoolError> {
    let request = WorkerRequest {
      config: config.clone(),
      input,
    };
    let mut payload = serde_json::to_string(&request)?;
    payload.push('\n');
    self.stdin.write_all(payload.as_bytes()).await?;
    self.stdin.flush().await?;

    let mut line = String::new();
    let read = self.stdout.read_line(&mut line).await?;
    if read == 0 {
      return Err(PoolError::Protocol {
        message: "worker process exited mid-request".to_string(),
      });
    }
    Ok(serde_json::from_str(&line)?)
  }
}

/// Bounded pool of reusable worker processes.
///
/// Workers spawn on demand up to the limit, are checked out for one request
/// at a time, and return to the idle set on success. A worker that failed a
/// request is discarded rather than reused.
pub struct ProcessPool {
  command: WorkerCommand,
  idle: Mutex<Vec<Worker>>,
  permits: Arc<Semaphore>,
}

impl ProcessPool {
  pub fn new(command: WorkerCommand, workers: usize) -> Self {
    Self {
      command,
      idle: Mutex::new(Vec::new()),
      permits: Arc::new(Semaphore::new(workers.max(1))),
    }
  }

  /// Dispatch one invocation to a worker process.
  pub async fn run(&self, config: &NodeConfig, input: NodeOutput) -> Result<NodeOutput, PoolError> {
    let _permit = self
      .permits
      .acquire()
      .await
      .map_err(|_| PoolError::ProcessPoolUnavailable {
        message: "pool is shut down".to_string(),
      })?;

    let mut worker = match self.idle.lock().await.pop() {
      Some(worker) => worker,
      None => self.spawn_worker().await?,
    };

    match worker.call(config, input).await {
      Ok(response) => {
        self.idle.lock().await.push(worker);
        response.into_result()
      }
      Err(e) => {
        // The worker's state is unknown; replace it instead of reusing.
        warn!(error = %e, "discarding failed worker process");
        let _ = worker.child.start_kill();
        Err(e)
      }
    }
  }

  async fn spawn_worker(&self) -> Result<Worker, PoolError> {
    debug!(program = %self.command.program.display(), "spawning worker process");
    let mut child = Command::new(&self.command.program)
      .args(&self.command.args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .kill_on_drop(true)
      .spawn()?;

    let stdin = child.stdin.take().ok_or_else(|| PoolError::Protocol {
      message: "worker stdin unavailable".to_string(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| PoolError::Protocol {
      message: "worker stdout unavailable".to_string(),
    })?;

    Ok(Worker {
      child,
      stdin: BufWriter::new(stdin),
      stdout: BufReader::new(stdout),
    })
  }

  /// Tear the pool down. Graceful shutdown closes each worker's stdin and
  /// waits for it to exit; forced shutdown kills the children.
  pub async fn shutdown(&self, force: bool) {
    self.permits.close();
    let mut idle = self.idle.lock().await;
    for mut worker in idle.drain(..) {
      if force {
        let _ = worker.child.start_kill();
      } else {
        // Dropping stdin delivers EOF; the worker loop exits on its own.
        drop(worker.stdin);
        let _ = worker.child.wait().await;
      }
    }
  }
}
