//! Single-node driver: one invocation, no graph walk.

use std::sync::Arc;

use async_trait::async_trait;
use dahlia_events::{EventBus, ExecutionEvent};
use dahlia_graph::Graph;
use dahlia_node::{BranchKey, NodeOutput, PoolKind};
use dahlia_pool::PoolExecutor;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::EngineError;
use crate::strategy::{ExecutionStrategy, seed_output};

/// Runs the workflow's one node and returns its output.
pub struct SingleNodeStrategy {
  workflow_id: String,
  graph: Arc<Graph>,
  pools: Arc<PoolExecutor>,
  bus: Arc<EventBus>,
  cancel: CancellationToken,
}

impl SingleNodeStrategy {
  pub fn new(
    workflow_id: impl Into<String>,
    graph: Arc<Graph>,
    pools: Arc<PoolExecutor>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      graph,
      pools,
      bus,
      cancel,
    }
  }

  fn node(&self) -> Result<&dahlia_graph::GraphNode, EngineError> {
    self
      .graph
      .iter()
      .next()
      .ok_or_else(|| EngineError::validation("no nodes"))
  }
}

#[async_trait]
impl ExecutionStrategy for SingleNodeStrategy {
  async fn prepare(&self) -> Result<(), EngineError> {
    self.node()?.instance().initialize().await?;
    Ok(())
  }

  async fn execute(&self, input: Option<Value>) -> Result<Option<NodeOutput>, EngineError> {
    let node = self.node()?;
    let node_id = node.id().to_string();
    let node_type = node.instance().identifier().to_string();

    self.bus.emit(ExecutionEvent::WorkflowStarted {
      workflow_id: self.workflow_id.clone(),
    });
    self.bus.emit(ExecutionEvent::NodeStarted {
      workflow_id: self.workflow_id.clone(),
      node_id: node_id.clone(),
      node_type: node_type.clone(),
    });

    let seed = seed_output(&node_id, input);
    let result = tokio::select! {
      _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
      result = self.pools.run(PoolKind::Cooperative, node.instance().clone(), seed) => {
        result.map_err(EngineError::from)
      }
    };

    match &result {
      Ok(_) => {
        self.bus.emit(ExecutionEvent::NodeCompleted {
          workflow_id: self.workflow_id.clone(),
          node_id: node_id.clone(),
          node_type: node_type.clone(),
          route: BranchKey::Default,
        });
        self.bus.emit(ExecutionEvent::WorkflowCompleted {
          workflow_id: self.workflow_id.clone(),
        });
        info!(workflow_id = %self.workflow_id, node_id = %node_id, "single node executed");
      }
      Err(e) => {
        self.bus.emit(ExecutionEvent::NodeFailed {
          workflow_id: self.workflow_id.clone(),
          node_id: node_id.clone(),
          node_type: node_type.clone(),
          error: e.to_string(),
        });
        self.bus.emit(ExecutionEvent::WorkflowFailed {
          workflow_id: self.workflow_id.clone(),
          error: e.to_string(),
        });
      }
    }

    result.map(Some)
  }

  async fn shutdown(&self, force: bool) {
    if force {
      self.cancel.cancel();
    }
    self.pools.shutdown(force).await;
  }
}
