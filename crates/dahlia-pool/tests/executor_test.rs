//! Integration tests for pool dispatch and the worker protocol.

use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use async_trait::async_trait;
use dahlia_node::{
  Node, NodeConfig, NodeDescriptor, NodeError, NodeOutput, NodeRegistry, NodeVariant, PoolKind,
  RunState,
};
use dahlia_pool::{PoolConfig, PoolError, PoolExecutor, WorkerRequest, WorkerResponse, run_worker_loop};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

struct Echo {
  config: NodeConfig,
  state: RunState,
  ran_on: Mutex<Option<ThreadId>>,
}

impl Echo {
  fn new(id: &str) -> Self {
    Self {
      config: NodeConfig::new(id, "echo"),
      state: RunState::new(),
      ran_on: Mutex::new(None),
    }
  }
}

#[async_trait]
impl Node for Echo {
  fn identifier(&self) -> &str {
    "echo"
  }
  fn config(&self) -> &NodeConfig {
    &self.config
  }
  fn state(&self) -> &RunState {
    &self.state
  }
  async fn execute(
    &self,
    _form: Map<String, Value>,
    mut input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    *self.ran_on.lock().unwrap() = Some(std::thread::current().id());
    input.data.insert("echoed".to_string(), json!(true));
    Ok(input)
  }
}

#[tokio::test]
async fn cooperative_runs_on_the_current_task() {
  let executor = PoolExecutor::new(PoolConfig::default());
  let node = Arc::new(Echo::new("e"));

  let out = executor
    .run(PoolKind::Cooperative, node.clone(), NodeOutput::new("seed"))
    .await
    .unwrap();

  assert_eq!(out.data["echoed"], json!(true));
  assert_eq!(node.state().execution_count(), 1);
  assert_eq!(
    *node.ran_on.lock().unwrap(),
    Some(std::thread::current().id())
  );
}

#[tokio::test]
async fn worker_thread_runs_off_the_current_thread() {
  let executor = PoolExecutor::new(PoolConfig::default());
  let node = Arc::new(Echo::new("e"));

  let out = executor
    .run(PoolKind::WorkerThread, node.clone(), NodeOutput::new("seed"))
    .await
    .unwrap();

  assert_eq!(out.data["echoed"], json!(true));
  let ran_on = node.ran_on.lock().unwrap().expect("node never ran");
  assert_ne!(ran_on, std::thread::current().id());

  executor.shutdown(false).await;
}

#[tokio::test]
async fn worker_thread_pool_handles_sequential_jobs() {
  let executor = PoolExecutor::new(PoolConfig {
    thread_workers: 2,
    ..PoolConfig::default()
  });
  let node = Arc::new(Echo::new("e"));

  for _ in 0..5 {
    executor
      .run(PoolKind::WorkerThread, node.clone(), NodeOutput::new("seed"))
      .await
      .unwrap();
  }
  assert_eq!(node.state().execution_count(), 5);

  executor.shutdown(false).await;
}

#[tokio::test]
async fn worker_process_without_command_is_unavailable() {
  let executor = PoolExecutor::new(PoolConfig::default());
  let node = Arc::new(Echo::new("e"));

  let err = executor
    .run(PoolKind::WorkerProcess, node, NodeOutput::new("seed"))
    .await
    .unwrap_err();
  assert!(matches!(err, PoolError::ProcessPoolUnavailable { .. }));
}

fn worker_registry() -> NodeRegistry {
  let mut registry = NodeRegistry::new();
  registry.register(NodeDescriptor::new("echo", NodeVariant::Blocking), |config| {
    Ok(Arc::new(Echo {
      config,
      state: RunState::new(),
      ran_on: Mutex::new(None),
    }) as Arc<dyn Node>)
  });
  registry
}

async fn roundtrip(registry: NodeRegistry, request: Value) -> WorkerResponse {
  let (client, server) = tokio::io::duplex(64 * 1024);
  let (server_read, server_write) = tokio::io::split(server);

  let worker = tokio::spawn(async move {
    run_worker_loop(&registry, BufReader::new(server_read), server_write).await
  });

  let (client_read, mut client_write) = tokio::io::split(client);
  let mut payload = request.to_string();
  payload.push('\n');
  client_write.write_all(payload.as_bytes()).await.unwrap();
  client_write.flush().await.unwrap();

  let mut reader = BufReader::new(client_read);
  let mut line = String::new();
  reader.read_line(&mut line).await.unwrap();

  // EOF ends the worker loop cleanly.
  drop(client_write);
  drop(reader);
  worker.await.unwrap().unwrap();

  serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn worker_loop_executes_a_request() {
  let request = serde_json::to_value(WorkerRequest {
    config: NodeConfig::new("e", "echo"),
    input: NodeOutput::new("seed").with_entry("x", json!(5)),
  })
  .unwrap();

  let response = roundtrip(worker_registry(), request).await;
  match response {
    WorkerResponse::Ok { output } => {
      assert_eq!(output.data["x"], json!(5));
      assert_eq!(output.data["echoed"], json!(true));
    }
    WorkerResponse::Err { message, .. } => panic!("worker failed: {message}"),
  }
}

#[tokio::test]
async fn worker_loop_reports_unknown_types() {
  let request = serde_json::to_value(WorkerRequest {
    config: NodeConfig::new("m", "missing"),
    input: NodeOutput::new("seed"),
  })
  .unwrap();

  let response = roundtrip(worker_registry(), request).await;
  match response {
    WorkerResponse::Err { node_id, message } => {
      assert_eq!(node_id, "m");
      assert!(message.contains("missing"));
    }
    WorkerResponse::Ok { .. } => panic!("expected an error response"),
  }
}

#[tokio::test]
async fn worker_loop_passes_sentinels_through() {
  let request = serde_json::to_value(WorkerRequest {
    config: NodeConfig::new("e", "echo"),
    input: NodeOutput::completion("upstream"),
  })
  .unwrap();

  let response = roundtrip(worker_registry(), request).await;
  match response {
    WorkerResponse::Ok { output } => assert!(output.is_completion()),
    WorkerResponse::Err { message, .. } => panic!("worker failed: {message}"),
  }
}
