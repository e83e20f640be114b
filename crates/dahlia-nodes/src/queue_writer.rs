use std::sync::Arc;

use async_trait::async_trait;
use dahlia_broker::QueueStore;
use dahlia_node::{Node, NodeConfig, NodeError, NodeOutput, NodeVariant, RunState};
use serde_json::{Map, Value};
use tracing::info;

use crate::QUEUE_NAME_KEY;

/// Pushes each incoming output onto a durable queue.
///
/// The queue name comes from the `queue` form field, or from the wiring
/// config written by the queue-naming pre-processor. On drain the cleanup
/// hook forwards the completion sentinel into the queue, so the consuming
/// loop can drain and exit in turn.
pub struct QueueWriter {
  config: NodeConfig,
  state: RunState,
  queues: Arc<dyn QueueStore>,
}

impl QueueWriter {
  pub fn new(config: NodeConfig, queues: Arc<dyn QueueStore>) -> Self {
    Self {
      config,
      state: RunState::new(),
      queues,
    }
  }

  fn queue_name(&self) -> Option<String> {
    if let Some(name) = self.config.form_str("queue") {
      return Some(name.to_string());
    }
    self
      .config
      .wiring_get(QUEUE_NAME_KEY)
      .and_then(|value| value.as_str().map(str::to_string))
  }
}

#[async_trait]
impl Node for QueueWriter {
  fn identifier(&self) -> &str {
    "queue-writer"
  }

  fn config(&self) -> &NodeConfig {
    &self.config
  }

  fn state(&self) -> &RunState {
    &self.state
  }

  fn variant(&self) -> NodeVariant {
    NodeVariant::Blocking
  }

  // Readiness stays lenient here: the queue name is wiring, assigned by the
  // pre-processor after validation has already run.
  fn writes_queue(&self) -> bool {
    true
  }

  async fn cleanup(&self, input: Option<&NodeOutput>) -> Result<(), NodeError> {
    let Some(input) = input else {
      return Ok(());
    };
    if !input.is_completion() {
      return Ok(());
    }
    let Some(queue) = self.queue_name() else {
      return Ok(());
    };

    let payload = input
      .to_value()
      .map_err(|source| NodeError::Serialization {
        node_id: self.config.id.clone(),
        source,
      })?;
    self
      .queues
      .push(&queue, &payload)
      .await
      .map_err(|e| NodeError::transport(&self.config.id, e.to_string()))?;
    info!(node_id = %self.config.id, queue = %queue, "completion sentinel forwarded");
    Ok(())
  }

  async fn execute(
    &self,
    _form: Map<String, Value>,
    mut input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    let queue = self
      .queue_name()
      .ok_or_else(|| NodeError::execution(&self.config.id, "no queue name configured"))?;

    let iteration = self.state.execution_count() + 1;
    input.note_provenance(&self.config.id, "queue_push", iteration);

    let payload = input
      .to_value()
      .map_err(|source| NodeError::Serialization {
        node_id: self.config.id.clone(),
        source,
      })?;
    self
      .queues
      .push(&queue, &payload)
      .await
      .map_err(|e| NodeError::transport(&self.config.id, e.to_string()))?;

    Ok(input)
  }
}
