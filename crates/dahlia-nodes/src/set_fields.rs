use async_trait::async_trait;
use dahlia_node::{Node, NodeConfig, NodeError, NodeOutput, NodeVariant, RunState};
use serde_json::{Map, Value};

/// Merges rendered fields into the payload.
///
/// Form: `fields`, an object whose values may be templates. Rendered entries
/// overwrite existing data keys.
pub struct SetFields {
  config: NodeConfig,
  state: RunState,
}

impl SetFields {
  pub fn new(config: NodeConfig) -> Self {
    Self {
      config,
      state: RunState::new(),
    }
  }
}

#[async_trait]
impl Node for SetFields {
  fn identifier(&self) -> &str {
    "set-fields"
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

  fn required_fields(&self) -> &[&str] {
    &["fields"]
  }

  async fn execute(
    &self,
    form: Map<String, Value>,
    mut input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    let Some(Value::Object(fields)) = form.get("fields") else {
      return Err(NodeError::execution(
        &self.config.id,
        "fields must be an object",
      ));
    };

    for (key, value) in fields {
      input.data.insert(key.clone(), value.clone());
    }

    let iteration = self.state.execution_count() + 1;
    input.note_provenance(&self.config.id, "set_fields", iteration);
    input.id = self.config.id.clone();
    Ok(input)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn rendered_fields_merge_into_data() {
    let mut form = Map::new();
    form.insert(
      "fields".to_string(),
      json!({ "greeting": "hi {{ data.name }}", "fixed": "v" }),
    );
    let node = SetFields::new(NodeConfig::new("set", "set-fields").with_form(form));

    let input = NodeOutput::new("up").with_entry("name", json!("ada"));
    let out = node.run(input).await.unwrap();

    assert_eq!(out.data["greeting"], json!("hi ada"));
    assert_eq!(out.data["fixed"], json!("v"));
    assert_eq!(out.data["name"], json!("ada"));
  }

  #[tokio::test]
  async fn non_object_fields_fail() {
    let mut form = Map::new();
    form.insert("fields".to_string(), json!("oops"));
    let node = SetFields::new(NodeConfig::new("set", "set-fields").with_form(form));

    assert!(node.run(NodeOutput::new("up")).await.is_err());
  }
}
