use std::time::Duration;

use async_trait::async_trait;
use dahlia_node::{Node, NodeConfig, NodeError, NodeOutput, NodeVariant, RunState};
use serde_json::{Map, Value};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Holds the payload for a configured duration, then passes it through.
///
/// Form: `delay_ms` (number or numeric string, default 1000).
pub struct Delay {
  config: NodeConfig,
  state: RunState,
}

impl Delay {
  pub fn new(config: NodeConfig) -> Self {
    Self {
      config,
      state: RunState::new(),
    }
  }

  fn delay(form: &Map<String, Value>) -> Duration {
    let millis = match form.get("delay_ms") {
      Some(Value::Number(n)) => n.as_u64().unwrap_or(DEFAULT_DELAY_MS),
      Some(Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_DELAY_MS),
      _ => DEFAULT_DELAY_MS,
    };
    Duration::from_millis(millis)
  }
}

#[async_trait]
impl Node for Delay {
  fn identifier(&self) -> &str {
    "delay"
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

  async fn execute(
    &self,
    form: Map<String, Value>,
    mut input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    tokio::time::sleep(Self::delay(&form)).await;

    let iteration = self.state.execution_count() + 1;
    input.note_provenance(&self.config.id, "delay", iteration);
    Ok(input)
  }
}
