use std::sync::Arc;

use async_trait::async_trait;
use dahlia_broker::QueueStore;
use dahlia_node::{Node, NodeConfig, NodeError, NodeOutput, NodeVariant, RunState};
use serde_json::{Map, Value};

use crate::QUEUE_NAME_KEY;

/// Producer that pops its outputs from a durable queue.
///
/// A popped completion sentinel is returned unchanged - the loop runner
/// recognizes it and drains the subgraph. Payloads that are not encoded
/// outputs are wrapped under a `message` key rather than dropped.
pub struct QueueReader {
  config: NodeConfig,
  state: RunState,
  queues: Arc<dyn QueueStore>,
}

impl QueueReader {
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
impl Node for QueueReader {
  fn identifier(&self) -> &str {
    "queue-reader"
  }

  fn config(&self) -> &NodeConfig {
    &self.config
  }

  fn state(&self) -> &RunState {
    &self.state
  }

  fn variant(&self) -> NodeVariant {
    NodeVariant::Producer
  }

  // Readiness stays lenient here: the queue name is wiring, assigned by the
  // pre-processor after validation has already run.
  fn reads_queue(&self) -> bool {
    true
  }

  async fn execute(
    &self,
    _form: Map<String, Value>,
    mut input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    let queue = self
      .queue_name()
      .ok_or_else(|| NodeError::execution(&self.config.id, "no queue name configured"))?;

    let value = self
      .queues
      .pop(&queue, None)
      .await
      .map_err(|e| NodeError::transport(&self.config.id, e.to_string()))?
      .ok_or_else(|| NodeError::transport(&self.config.id, "blocking pop returned nothing"))?;

    match NodeOutput::from_value(value.clone()) {
      Ok(message) => Ok(message),
      Err(_) => {
        let iteration = self.state.execution_count() + 1;
        input.data.insert("message".to_string(), value);
        input.note_provenance(&self.config.id, "queue_pop", iteration);
        input.id = self.config.id.clone();
        Ok(input)
      }
    }
  }
}
