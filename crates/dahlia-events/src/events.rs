//! Execution events and the in-process bus.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use dahlia_node::BranchKey;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::error;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// Workflow execution has started.
  WorkflowStarted { workflow_id: String },

  /// All loops terminated cleanly (sentinel drain or shutdown).
  WorkflowCompleted { workflow_id: String },

  /// Workflow execution failed.
  WorkflowFailed { workflow_id: String, error: String },

  /// A node has started executing.
  NodeStarted {
    workflow_id: String,
    node_id: String,
    node_type: String,
  },

  /// A node has completed. `route` is the branch decision a conditional
  /// node just made, `default` for every other node.
  NodeCompleted {
    workflow_id: String,
    node_id: String,
    node_type: String,
    route: BranchKey,
  },

  /// A node has failed; the iteration was abandoned.
  NodeFailed {
    workflow_id: String,
    node_id: String,
    node_type: String,
    error: String,
  },
}

impl ExecutionEvent {
  pub fn workflow_id(&self) -> &str {
    match self {
      ExecutionEvent::WorkflowStarted { workflow_id }
      | ExecutionEvent::WorkflowCompleted { workflow_id }
      | ExecutionEvent::WorkflowFailed { workflow_id, .. }
      | ExecutionEvent::NodeStarted { workflow_id, .. }
      | ExecutionEvent::NodeCompleted { workflow_id, .. }
      | ExecutionEvent::NodeFailed { workflow_id, .. } => workflow_id,
    }
  }
}

/// Trait for receiving execution events.
///
/// The bus calls `notify` for each event - implementations decide what to do
/// with them (track state, stream to a UI, log, ignore).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: &ExecutionEvent);
}

/// A notifier that forwards events into an unbounded channel.
///
/// Use this to consume events asynchronously (persist, stream over a push
/// channel). Unbounded so a slow consumer cannot stall the scheduler; volume
/// is one event per node start/complete, so growth stays small in practice.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// A notifier plus the receiving half of its channel.
  pub fn pair() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: &ExecutionEvent) {
    // Ignore send errors - the receiver may have been dropped.
    let _ = self.sender.send(event.clone());
  }
}

/// Per-workflow in-process publish/subscribe.
///
/// Subscribers are invoked synchronously from the emitter in subscription
/// order. The subscriber list is copied before dispatch, so emitting never
/// holds the lock while running callbacks.
#[derive(Default)]
pub struct EventBus {
  subscribers: RwLock<Vec<Arc<dyn ExecutionNotifier>>>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn subscribe(&self, notifier: Arc<dyn ExecutionNotifier>) {
    self
      .subscribers
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .push(notifier);
  }

  pub fn emit(&self, event: ExecutionEvent) {
    let subscribers = self
      .subscribers
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();

    for subscriber in subscribers {
      if catch_unwind(AssertUnwindSafe(|| subscriber.notify(&event))).is_err() {
        error!(workflow_id = %event.workflow_id(), "event subscriber panicked");
      }
    }
  }
}

impl std::fmt::Debug for EventBus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let count = self
      .subscribers
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len();
    f.debug_struct("EventBus").field("subscribers", &count).finish()
  }
}
