//! Request/response driver.
//!
//! One-shot: invoke the unique entry node with the request payload, walk
//! downstream with the same branch selection as the loop runner, and stop at
//! (a) the end of the graph, (b) a non-blocking node, or (c) a respond node
//! whose output carries the response-ready flag. Returns the terminal output
//! if one exists, the last output otherwise.

use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dahlia_events::{EventBus, ExecutionEvent};
use dahlia_graph::{Graph, GraphNode, analyzer};
use dahlia_node::{NodeOutput, NodeVariant, PoolKind};
use dahlia_pool::PoolExecutor;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::EngineError;
use crate::looper::completion_route;
use crate::strategy::{ExecutionStrategy, seed_output};

struct WalkOutcome {
  terminal: Option<NodeOutput>,
  last: Option<NodeOutput>,
}

/// One-shot request/response execution over a producer-free graph.
pub struct ApiStrategy {
  workflow_id: String,
  graph: Arc<Graph>,
  pools: Arc<PoolExecutor>,
  bus: Arc<EventBus>,
  cancel: CancellationToken,
  entry: OnceLock<(String, PoolKind)>,
}

impl ApiStrategy {
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
      entry: OnceLock::new(),
    }
  }

  fn entry(&self) -> Result<&(String, PoolKind), EngineError> {
    self
      .entry
      .get()
      .ok_or_else(|| EngineError::validation("strategy not prepared"))
  }

  /// Walk downstream of `current`, applying loop-runner branch selection.
  ///
  /// `terminal` is set when a respond node produced the response; `last` is
  /// the most recent output anywhere below `current`.
  fn walk<'a>(
    &'a self,
    current: &'a GraphNode,
    input: NodeOutput,
    pool: PoolKind,
  ) -> Pin<Box<dyn Future<Output = Result<WalkOutcome, EngineError>> + Send + 'a>> {
    Box::pin(async move {
      let available = current.next().keys().cloned().collect();
      let keys = current.instance().branches_to_follow(&input, &available);
      let mut last = None;

      for key in keys {
        let Some(children) = current.next().get(&key) else {
          continue;
        };
        for child_id in children {
          let child = self
            .graph
            .lookup(child_id)
            .ok_or_else(|| EngineError::MissingNode {
              node_id: child_id.clone(),
            })?;
          if child.instance().variant() == NodeVariant::Producer {
            continue;
          }

          let output = self.invoke(child, input.clone(), pool).await?;
          last = Some(output.clone());

          if output.signals_response() || child.instance().emits_response() {
            return Ok(WalkOutcome {
              terminal: Some(output),
              last,
            });
          }
          if child.instance().continue_after_execution() {
            let below = self.walk(child, output, pool).await?;
            if below.last.is_some() {
              last = below.last;
            }
            if below.terminal.is_some() {
              return Ok(WalkOutcome {
                terminal: below.terminal,
                last,
              });
            }
          }
        }
      }

      Ok(WalkOutcome {
        terminal: None,
        last,
      })
    })
  }

  async fn invoke(
    &self,
    node: &GraphNode,
    input: NodeOutput,
    pool: PoolKind,
  ) -> Result<NodeOutput, EngineError> {
    self.bus.emit(ExecutionEvent::NodeStarted {
      workflow_id: self.workflow_id.clone(),
      node_id: node.id().to_string(),
      node_type: node.instance().identifier().to_string(),
    });

    let result = tokio::select! {
      _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
      result = self.pools.run(pool, node.instance().clone(), input) => result,
    };

    match result {
      Ok(output) => {
        self.bus.emit(ExecutionEvent::NodeCompleted {
          workflow_id: self.workflow_id.clone(),
          node_id: node.id().to_string(),
          node_type: node.instance().identifier().to_string(),
          route: completion_route(node.instance().as_ref()),
        });
        Ok(output)
      }
      Err(e) => {
        self.bus.emit(ExecutionEvent::NodeFailed {
          workflow_id: self.workflow_id.clone(),
          node_id: node.id().to_string(),
          node_type: node.instance().identifier().to_string(),
          error: e.to_string(),
        });
        error!(
          workflow_id = %self.workflow_id,
          node_id = %node.id(),
          error = %e,
          "node_failed"
        );
        Err(e.into())
      }
    }
  }
}

#[async_trait]
impl ExecutionStrategy for ApiStrategy {
  async fn prepare(&self) -> Result<(), EngineError> {
    let entries = analyzer::entry_ids(&self.graph);
    let [entry_id] = entries.as_slice() else {
      return Err(EngineError::validation(format!(
        "api workflow requires exactly one entry node, found {}",
        entries.len()
      )));
    };
    let entry_id = (*entry_id).to_string();

    let chain = analyzer::chain(&self.graph, &entry_id);
    for id in &chain {
      let node = self.graph.lookup(id).ok_or_else(|| EngineError::MissingNode {
        node_id: id.clone(),
      })?;
      node.instance().initialize().await?;
    }

    let pool = analyzer::iteration_pool(&self.graph, chain.iter().map(String::as_str));
    let _ = self.entry.set((entry_id, pool));
    Ok(())
  }

  async fn execute(&self, input: Option<Value>) -> Result<Option<NodeOutput>, EngineError> {
    let (entry_id, pool) = self.entry()?.clone();
    let entry = self
      .graph
      .lookup(&entry_id)
      .ok_or_else(|| EngineError::MissingNode {
        node_id: entry_id.clone(),
      })?;

    self.bus.emit(ExecutionEvent::WorkflowStarted {
      workflow_id: self.workflow_id.clone(),
    });
    info!(workflow_id = %self.workflow_id, entry = %entry_id, "workflow_started");

    let seed = seed_output(&entry_id, input);
    let result: Result<NodeOutput, EngineError> = async {
      let entry_output = self.invoke(entry, seed, pool).await?;

      if entry_output.signals_response() || entry.instance().emits_response() {
        return Ok(entry_output);
      }
      if !entry.instance().continue_after_execution() {
        return Ok(entry_output);
      }

      let outcome = self.walk(entry, entry_output.clone(), pool).await?;
      match outcome.terminal {
        Some(terminal) => Ok(terminal),
        None => Ok(outcome.last.unwrap_or(entry_output)),
      }
    }
    .await;

    match &result {
      Ok(_) => {
        self.bus.emit(ExecutionEvent::WorkflowCompleted {
          workflow_id: self.workflow_id.clone(),
        });
        info!(workflow_id = %self.workflow_id, "workflow_completed");
      }
      Err(e) => {
        self.bus.emit(ExecutionEvent::WorkflowFailed {
          workflow_id: self.workflow_id.clone(),
          error: e.to_string(),
        });
        error!(workflow_id = %self.workflow_id, error = %e, "workflow_failed");
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
