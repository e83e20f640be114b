//! Production driver: one loop runner per producer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dahlia_events::{EventBus, ExecutionEvent};
use dahlia_graph::{Graph, analyzer};
use dahlia_node::NodeOutput;
use dahlia_pool::PoolExecutor;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::EngineError;
use crate::looper::LoopRunner;
use crate::strategy::ExecutionStrategy;

/// Spawns every producer's loop concurrently and waits for all of them to
/// terminate - each by sentinel drain or by shutdown.
pub struct ProductionStrategy {
  workflow_id: String,
  runners: Vec<Arc<LoopRunner>>,
  bus: Arc<EventBus>,
  pools: Arc<PoolExecutor>,
  cancel: CancellationToken,
}

impl ProductionStrategy {
  pub fn new(
    workflow_id: impl Into<String>,
    graph: Arc<Graph>,
    pools: Arc<PoolExecutor>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    error_backoff: Duration,
  ) -> Result<Self, EngineError> {
    let workflow_id = workflow_id.into();

    let mut runners = Vec::new();
    for producer in analyzer::producers(&graph) {
      runners.push(Arc::new(LoopRunner::new(
        workflow_id.clone(),
        producer.id(),
        graph.clone(),
        pools.clone(),
        bus.clone(),
        cancel.child_token(),
        error_backoff,
      )?));
    }

    Ok(Self {
      workflow_id,
      runners,
      bus,
      pools,
      cancel,
    })
  }

  pub fn runners(&self) -> &[Arc<LoopRunner>] {
    &self.runners
  }
}

#[async_trait]
impl ExecutionStrategy for ProductionStrategy {
  async fn prepare(&self) -> Result<(), EngineError> {
    for runner in &self.runners {
      runner.initialize().await?;
    }
    Ok(())
  }

  async fn execute(&self, _input: Option<Value>) -> Result<Option<NodeOutput>, EngineError> {
    self.bus.emit(ExecutionEvent::WorkflowStarted {
      workflow_id: self.workflow_id.clone(),
    });
    info!(
      workflow_id = %self.workflow_id,
      loops = self.runners.len(),
      "workflow_started"
    );

    let tasks: Vec<_> = self
      .runners
      .iter()
      .cloned()
      .map(|runner| tokio::spawn(async move { runner.run().await }))
      .collect();

    let mut failure: Option<EngineError> = None;
    for result in futures::future::join_all(tasks).await {
      match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => failure = failure.or(Some(e)),
        Err(e) => {
          failure = failure.or(Some(EngineError::Task {
            message: e.to_string(),
          }));
        }
      }
    }

    match failure {
      None => {
        self.bus.emit(ExecutionEvent::WorkflowCompleted {
          workflow_id: self.workflow_id.clone(),
        });
        info!(workflow_id = %self.workflow_id, "workflow_completed");
        Ok(None)
      }
      Some(e) => {
        self.bus.emit(ExecutionEvent::WorkflowFailed {
          workflow_id: self.workflow_id.clone(),
          error: e.to_string(),
        });
        Err(e)
      }
    }
  }

  async fn shutdown(&self, force: bool) {
    info!(workflow_id = %self.workflow_id, force, "workflow shutdown requested");
    for runner in &self.runners {
      if force {
        runner.force_shutdown();
      } else {
        runner.shutdown();
      }
    }
    if force {
      self.cancel.cancel();
    }
    self.pools.shutdown(force).await;
  }
}
