use async_trait::async_trait;
use dahlia_node::{
  Node, NodeConfig, NodeError, NodeOutput, NodeVariant, RESPONSE_READY, RunState,
};
use serde_json::{Map, Value, json};

/// Terminal node for API workflows: marks its output as the response.
///
/// Form: optional `body` (template or object). Without a body the accreted
/// payload itself becomes the response. The API strategy stops walking when
/// it sees the response-ready flag; production validation rejects the node
/// outright.
pub struct Respond {
  config: NodeConfig,
  state: RunState,
}

impl Respond {
  pub fn new(config: NodeConfig) -> Self {
    Self {
      config,
      state: RunState::new(),
    }
  }
}

#[async_trait]
impl Node for Respond {
  fn identifier(&self) -> &str {
    "respond"
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

  fn emits_response(&self) -> bool {
    true
  }

  async fn execute(
    &self,
    form: Map<String, Value>,
    mut input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    let body = match form.get("body") {
      Some(body) => body.clone(),
      None => Value::Object(input.data.clone()),
    };

    input.data.insert("response".to_string(), body);
    input.metadata.insert(RESPONSE_READY.to_string(), json!(true));

    let iteration = self.state.execution_count() + 1;
    input.note_provenance(&self.config.id, "respond", iteration);
    input.id = self.config.id.clone();
    Ok(input)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn marks_the_output_as_response_ready() {
    let mut form = Map::new();
    form.insert("body".to_string(), json!("{{ data.result }}"));
    let node = Respond::new(NodeConfig::new("reply", "respond").with_form(form));

    let input = NodeOutput::new("up").with_entry("result", json!("done"));
    let out = node.run(input).await.unwrap();

    assert!(out.signals_response());
    assert_eq!(out.data["response"], json!("done"));
  }

  #[tokio::test]
  async fn defaults_to_the_accreted_payload() {
    let node = Respond::new(NodeConfig::new("reply", "respond"));
    let input = NodeOutput::new("up").with_entry("x", json!(1));
    let out = node.run(input).await.unwrap();

    assert_eq!(out.data["response"]["x"], json!(1));
  }
}
