use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dahlia_node::{Node, NodeConfig, NodeError, NodeOutput, NodeVariant, RunState};
use serde_json::{Map, Value, json};

const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Producer that emits a tick on a fixed interval.
///
/// Form: `interval_ms` (number or numeric string, default 1000).
pub struct IntervalTrigger {
  config: NodeConfig,
  state: RunState,
}

impl IntervalTrigger {
  pub fn new(config: NodeConfig) -> Self {
    Self {
      config,
      state: RunState::new(),
    }
  }

  fn interval(form: &Map<String, Value>) -> Duration {
    let millis = match form.get("interval_ms") {
      Some(Value::Number(n)) => n.as_u64().unwrap_or(DEFAULT_INTERVAL_MS),
      Some(Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_INTERVAL_MS),
      _ => DEFAULT_INTERVAL_MS,
    };
    Duration::from_millis(millis)
  }
}

#[async_trait]
impl Node for IntervalTrigger {
  fn identifier(&self) -> &str {
    "interval-trigger"
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

  async fn execute(
    &self,
    form: Map<String, Value>,
    mut input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    tokio::time::sleep(Self::interval(&form)).await;

    let iteration = self.state.execution_count() + 1;
    let key = self.unique_output_key(&input, "tick");
    input.data.insert(
      key,
      json!({
        "count": iteration,
        "at": Utc::now().to_rfc3339(),
      }),
    );
    input.note_provenance(&self.config.id, "tick", iteration);
    input.id = self.config.id.clone();
    Ok(input)
  }
}
