//! The per-producer scheduler.
//!
//! A loop runner owns exactly one producer and the subgraph it induces. Each
//! iteration calls the producer with an empty input, then cascades the output
//! through the selected branches. Iterations within one loop are strictly
//! sequential; different loops interleave freely.
//!
//! Termination paths:
//!
//! - the producer emits a completion sentinel (popped off a queue or emitted
//!   on its own) - the runner broadcasts it through the subgraph, invoking
//!   each node's cleanup exactly once, then exits;
//! - soft shutdown clears the running flag - the current iteration finishes,
//!   then the runner feeds a sentinel of its own through the subgraph so
//!   queue writers can drain their consumers;
//! - forced shutdown cancels the task mid-iteration, skipping the drain.
//!
//! A node failure abandons the iteration (logged, `node_failed` emitted, a
//! short fixed backoff), then the loop continues with a fresh iteration. The
//! failed payload is not retried. A sentinel cascade is never retried - it
//! must complete exactly once per sentinel.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dahlia_events::{EventBus, ExecutionEvent};
use dahlia_graph::{Graph, GraphNode, analyzer};
use dahlia_node::{BranchKey, Node, NodeOutput, NodeVariant, PoolKind};
use dahlia_pool::PoolExecutor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::EngineError;

enum IterationOutcome {
  Continue,
  Drained,
  Cancelled,
}

/// Scheduler driving one producer through its downstream subgraph.
pub struct LoopRunner {
  workflow_id: String,
  producer_id: String,
  graph: Arc<Graph>,
  subgraph: Vec<String>,
  iteration_pool: PoolKind,
  pools: Arc<PoolExecutor>,
  bus: Arc<EventBus>,
  running: AtomicBool,
  iteration: AtomicU64,
  cancel: CancellationToken,
  error_backoff: Duration,
}

impl LoopRunner {
  pub fn new(
    workflow_id: impl Into<String>,
    producer_id: impl Into<String>,
    graph: Arc<Graph>,
    pools: Arc<PoolExecutor>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    error_backoff: Duration,
  ) -> Result<Self, EngineError> {
    let producer_id = producer_id.into();
    if graph.lookup(&producer_id).is_none() {
      return Err(EngineError::MissingNode {
        node_id: producer_id,
      });
    }

    let subgraph = analyzer::chain(&graph, &producer_id);
    let iteration_pool = analyzer::iteration_pool(&graph, subgraph.iter().map(String::as_str));

    Ok(Self {
      workflow_id: workflow_id.into(),
      producer_id,
      graph,
      subgraph,
      iteration_pool,
      pools,
      bus,
      running: AtomicBool::new(true),
      iteration: AtomicU64::new(0),
      cancel,
      error_backoff,
    })
  }

  pub fn producer_id(&self) -> &str {
    &self.producer_id
  }

  /// The pool this runner's iterations execute on (max preference across the
  /// subgraph).
  pub fn iteration_pool(&self) -> PoolKind {
    self.iteration_pool
  }

  /// Let the current iteration finish, then exit and drain.
  pub fn shutdown(&self) {
    self.running.store(false, Ordering::SeqCst);
  }

  /// Cancel the producer task mid-iteration; no drain.
  pub fn force_shutdown(&self) {
    self.running.store(false, Ordering::SeqCst);
    self.cancel.cancel();
  }

  /// Walk the subgraph once, initializing every node (validate + setup).
  pub async fn initialize(&self) -> Result<(), EngineError> {
    for id in &self.subgraph {
      let node = self.lookup(id)?;
      node.instance().initialize().await?;
    }
    Ok(())
  }

  /// The step loop. Returns once the loop drained or was shut down.
  pub async fn run(&self) -> Result<(), EngineError> {
    info!(
      workflow_id = %self.workflow_id,
      producer = %self.producer_id,
      pool = %self.iteration_pool,
      "loop_started"
    );

    let mut drained = false;
    let mut cancelled = false;
    while self.running.load(Ordering::SeqCst) {
      match self.iteration().await {
        IterationOutcome::Continue => {}
        IterationOutcome::Drained => {
          drained = true;
          break;
        }
        IterationOutcome::Cancelled => {
          cancelled = true;
          break;
        }
      }
    }

    if !drained && !cancelled && !self.cancel.is_cancelled() {
      // Shutdown-initiated drain: feed a sentinel of our own through the
      // subgraph so each node cleans up and queue writers propagate it.
      self
        .drain(NodeOutput::completion(&self.producer_id), true)
        .await;
    }

    info!(
      workflow_id = %self.workflow_id,
      producer = %self.producer_id,
      iterations = self.iteration.load(Ordering::SeqCst),
      drained,
      "loop_stopped"
    );
    Ok(())
  }

  async fn iteration(&self) -> IterationOutcome {
    let producer = match self.lookup(&self.producer_id) {
      Ok(producer) => producer,
      Err(e) => {
        error!(workflow_id = %self.workflow_id, error = %e, "producer missing, stopping loop");
        return IterationOutcome::Drained;
      }
    };
    let iteration = self.iteration.fetch_add(1, Ordering::SeqCst) + 1;

    self.emit_started(producer);
    let seed = NodeOutput::new(&self.producer_id);
    let result = tokio::select! {
      _ = self.cancel.cancelled() => return IterationOutcome::Cancelled,
      result = self.pools.run(self.iteration_pool, producer.instance().clone(), seed) => result,
    };

    let output = match result {
      Ok(output) => output,
      Err(e) => {
        error!(
          workflow_id = %self.workflow_id,
          producer = %self.producer_id,
          iteration,
          error = %e,
          "iteration_failed"
        );
        self.emit_failed(producer, &e.to_string());
        return self.backoff().await;
      }
    };

    if output.is_completion() {
      self.emit_completed(producer, BranchKey::Default);
      info!(
        workflow_id = %self.workflow_id,
        producer = %self.producer_id,
        iteration,
        "completion sentinel received"
      );
      self.drain(output, false).await;
      return IterationOutcome::Drained;
    }

    self.emit_completed(producer, BranchKey::Default);
    if let Err(e) = self.process_next(producer, output).await {
      if matches!(e, EngineError::Cancelled) {
        return IterationOutcome::Cancelled;
      }
      // The failing node already emitted node_failed; abandon the payload.
      warn!(
        workflow_id = %self.workflow_id,
        producer = %self.producer_id,
        iteration,
        error = %e,
        "iteration abandoned"
      );
      return self.backoff().await;
    }

    IterationOutcome::Continue
  }

  /// Cascade an output through the branches the current node selects.
  ///
  /// Downstream nodes run in (branch-key order × insertion order). A node
  /// whose `continue_after_execution` is false stops the descent below
  /// itself but not its siblings. Producers reached through an edge are
  /// skipped - their inputs arrive through queues, and they own their own
  /// loops.
  fn process_next<'a>(
    &'a self,
    current: &'a GraphNode,
    input: NodeOutput,
  ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
    Box::pin(async move {
      let available: BTreeSet<BranchKey> = current.next().keys().cloned().collect();
      let keys = current.instance().branches_to_follow(&input, &available);

      for key in keys {
        let Some(children) = current.next().get(&key) else {
          continue;
        };
        for child_id in children {
          let child = self.lookup(child_id)?;
          if child.instance().variant() == NodeVariant::Producer {
            continue;
          }

          self.emit_started(child);
          let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
            result = self.pools.run(self.iteration_pool, child.instance().clone(), input.clone()) => result,
          };

          match result {
            Ok(output) => {
              self.emit_completed(child, completion_route(child.instance().as_ref()));
              if child.instance().continue_after_execution() {
                self.process_next(child, output).await?;
              }
            }
            Err(e) => {
              self.emit_failed(child, &e.to_string());
              error!(
                workflow_id = %self.workflow_id,
                node_id = %child.id(),
                route = %key,
                error = %e,
                "node_failed"
              );
              return Err(e.into());
            }
          }
        }
      }

      Ok(())
    })
  }

  /// Broadcast a completion sentinel through the subgraph.
  ///
  /// Every reachable node is visited exactly once and runs the sentinel
  /// through its `run` entry, which routes into `cleanup`. Failures are
  /// logged and skipped - the cascade completes exactly once per sentinel
  /// and is never retried. Cleanup releases in-process resources, so the
  /// cascade always runs cooperatively.
  async fn drain(&self, sentinel: NodeOutput, run_producer: bool) {
    let Ok(producer) = self.lookup(&self.producer_id) else {
      return;
    };

    if run_producer {
      if let Err(e) = self
        .pools
        .run(PoolKind::Cooperative, producer.instance().clone(), sentinel.clone())
        .await
      {
        warn!(node_id = %self.producer_id, error = %e, "producer cleanup failed");
      }
    } else if let Err(e) = producer.instance().cleanup(Some(&sentinel)).await {
      warn!(node_id = %self.producer_id, error = %e, "producer cleanup failed");
    }

    let mut visited: HashSet<String> = HashSet::from([self.producer_id.clone()]);
    let mut queue: VecDeque<String> = producer.downstream_ids().map(str::to_string).collect();

    while let Some(id) = queue.pop_front() {
      if !visited.insert(id.clone()) {
        continue;
      }
      let Ok(node) = self.lookup(&id) else {
        continue;
      };
      if node.instance().variant() == NodeVariant::Producer {
        continue;
      }

      if let Err(e) = self
        .pools
        .run(PoolKind::Cooperative, node.instance().clone(), sentinel.clone())
        .await
      {
        warn!(node_id = %id, error = %e, "cleanup failed during drain");
      }

      for target in node.downstream_ids() {
        if !visited.contains(target) {
          queue.push_back(target.to_string());
        }
      }
    }
  }

  /// Fixed pause after a failed iteration; cancellable.
  async fn backoff(&self) -> IterationOutcome {
    tokio::select! {
      _ = self.cancel.cancelled() => IterationOutcome::Cancelled,
      _ = tokio::time::sleep(self.error_backoff) => IterationOutcome::Continue,
    }
  }

  fn lookup(&self, id: &str) -> Result<&GraphNode, EngineError> {
    self.graph.lookup(id).ok_or_else(|| EngineError::MissingNode {
      node_id: id.to_string(),
    })
  }

  fn emit_started(&self, node: &GraphNode) {
    self.bus.emit(ExecutionEvent::NodeStarted {
      workflow_id: self.workflow_id.clone(),
      node_id: node.id().to_string(),
      node_type: node.instance().identifier().to_string(),
    });
  }

  fn emit_completed(&self, node: &GraphNode, route: BranchKey) {
    self.bus.emit(ExecutionEvent::NodeCompleted {
      workflow_id: self.workflow_id.clone(),
      node_id: node.id().to_string(),
      node_type: node.instance().identifier().to_string(),
      route,
    });
  }

  fn emit_failed(&self, node: &GraphNode, error: &str) {
    self.bus.emit(ExecutionEvent::NodeFailed {
      workflow_id: self.workflow_id.clone(),
      node_id: node.id().to_string(),
      node_type: node.instance().identifier().to_string(),
      error: error.to_string(),
    });
  }
}

/// The route reported in a node's completion event: a conditional reports
/// the decision it just made, everything else reports `default`.
pub(crate) fn completion_route(node: &dyn Node) -> BranchKey {
  if node.variant() == NodeVariant::Conditional {
    node.state().selected_branch().unwrap_or(BranchKey::Default)
  } else {
    BranchKey::Default
  }
}
