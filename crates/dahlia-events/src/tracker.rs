//! Per-workflow execution state, folded from the event stream.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use dahlia_node::BranchKey;
use serde::{Deserialize, Serialize};

/// Workflow-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
  Idle,
  Running,
  Completed,
  Failed,
}

/// A node currently executing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutingEntry {
  pub node_type: String,
  pub started_at: DateTime<Utc>,
}

/// A node that finished (or failed) during this run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedEntry {
  pub node_id: String,
  pub node_type: String,
  pub completed_at: DateTime<Utc>,
  pub duration_ms: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub route: Option<BranchKey>,
  pub failed: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// Deep-copyable snapshot of one workflow's execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
  pub workflow_id: String,
  pub status: WorkflowStatus,
  pub executing: BTreeMap<String, ExecutingEntry>,
  pub completed: Vec<CompletedEntry>,
  /// Most recent error per node, kept visible across iterations.
  pub last_errors: BTreeMap<String, String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl WorkflowState {
  fn new(workflow_id: String) -> Self {
    Self {
      workflow_id,
      status: WorkflowStatus::Idle,
      executing: BTreeMap::new(),
      completed: Vec::new(),
      last_errors: BTreeMap::new(),
      started_at: None,
      completed_at: None,
      error: None,
    }
  }
}

struct Inner {
  state: WorkflowState,
  started: HashMap<String, Instant>,
}

/// Thread-safe tracker of executing/completed nodes for one workflow.
///
/// Subscribes to the event bus; all mutations happen under one coarse mutex
/// and readers receive an owned deep copy, safe to hand to a push channel
/// streaming snapshots to a UI.
pub struct StateTracker {
  inner: Mutex<Inner>,
}

impl StateTracker {
  pub fn new(workflow_id: impl Into<String>) -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: WorkflowState::new(workflow_id.into()),
        started: HashMap::new(),
      }),
    }
  }

  /// A consistent deep copy of the current state.
  pub fn snapshot(&self) -> WorkflowState {
    self
      .inner
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .state
      .clone()
  }
}

impl super::ExecutionNotifier for StateTracker {
  fn notify(&self, event: &super::ExecutionEvent) {
    use super::ExecutionEvent::*;

    let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    match event {
      WorkflowStarted { .. } => {
        inner.state.status = WorkflowStatus::Running;
        inner.state.started_at = Some(Utc::now());
      }
      WorkflowCompleted { .. } => {
        inner.state.status = WorkflowStatus::Completed;
        inner.state.completed_at = Some(Utc::now());
      }
      WorkflowFailed { error, .. } => {
        inner.state.status = WorkflowStatus::Failed;
        inner.state.completed_at = Some(Utc::now());
        inner.state.error = Some(error.clone());
      }
      NodeStarted { node_id, node_type, .. } => {
        inner.started.insert(node_id.clone(), Instant::now());
        inner.state.executing.insert(
          node_id.clone(),
          ExecutingEntry {
            node_type: node_type.clone(),
            started_at: Utc::now(),
          },
        );
      }
      NodeCompleted {
        node_id,
        node_type,
        route,
        ..
      } => {
        inner.state.executing.remove(node_id);
        let duration_ms = inner
          .started
          .remove(node_id)
          .map_or(0, |started| started.elapsed().as_millis() as u64);
        inner.state.completed.push(CompletedEntry {
          node_id: node_id.clone(),
          node_type: node_type.clone(),
          completed_at: Utc::now(),
          duration_ms,
          route: Some(route.clone()),
          failed: false,
          error: None,
        });
      }
      NodeFailed {
        node_id,
        node_type,
        error,
        ..
      } => {
        inner.state.executing.remove(node_id);
        let duration_ms = inner
          .started
          .remove(node_id)
          .map_or(0, |started| started.elapsed().as_millis() as u64);
        inner.state.completed.push(CompletedEntry {
          node_id: node_id.clone(),
          node_type: node_type.clone(),
          completed_at: Utc::now(),
          duration_ms,
          route: None,
          failed: true,
          error: Some(error.clone()),
        });
        inner.state.last_errors.insert(node_id.clone(), error.clone());
      }
    }
  }
}
