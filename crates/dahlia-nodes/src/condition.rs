use std::sync::Arc;

use async_trait::async_trait;
use dahlia_node::{Node, NodeConfig, NodeError, NodeOutput, NodeVariant, RunState};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::operators::OperatorRegistry;

/// Conditional router: evaluates `field <operator> value` and selects the
/// `yes` or `no` branch for the scheduler.
///
/// Form: `field` (usually a template like `{{ data.x }}`), `operator` (an
/// [`OperatorRegistry`] key) and `value`. The input passes through unchanged
/// apart from a `condition_result` metadata entry.
pub struct Condition {
  config: NodeConfig,
  state: RunState,
  operators: Arc<OperatorRegistry>,
}

impl Condition {
  pub fn new(config: NodeConfig, operators: Arc<OperatorRegistry>) -> Self {
    Self {
      config,
      state: RunState::new(),
      operators,
    }
  }
}

#[async_trait]
impl Node for Condition {
  fn identifier(&self) -> &str {
    "condition"
  }

  fn config(&self) -> &NodeConfig {
    &self.config
  }

  fn state(&self) -> &RunState {
    &self.state
  }

  fn variant(&self) -> NodeVariant {
    NodeVariant::Conditional
  }

  fn required_fields(&self) -> &[&str] {
    &["field", "operator"]
  }

  async fn execute(
    &self,
    form: Map<String, Value>,
    mut input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    let field = form.get("field").cloned().unwrap_or(Value::Null);
    let value = form.get("value").cloned().unwrap_or(Value::Null);
    let operator_name = form
      .get("operator")
      .and_then(Value::as_str)
      .ok_or_else(|| NodeError::execution(&self.config.id, "operator is not configured"))?;

    let operator = self.operators.lookup(operator_name).ok_or_else(|| {
      NodeError::execution(
        &self.config.id,
        format!("unknown operator '{operator_name}'"),
      )
    })?;

    let result = operator(&field, &value);
    self.state.record_decision(result);
    debug!(
      node_id = %self.config.id,
      operator = %operator_name,
      result,
      "condition evaluated"
    );

    let iteration = self.state.execution_count() + 1;
    input.metadata.insert("condition_result".to_string(), json!(result));
    input.note_provenance(&self.config.id, "condition", iteration);
    Ok(input)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use dahlia_node::BranchKey;
  use std::collections::BTreeSet;

  fn condition(field: &str, operator: &str, value: Value) -> Condition {
    let mut form = Map::new();
    form.insert("field".to_string(), json!(field));
    form.insert("operator".to_string(), json!(operator));
    form.insert("value".to_string(), value);
    Condition::new(
      NodeConfig::new("check", "condition").with_form(form),
      Arc::new(OperatorRegistry::with_defaults()),
    )
  }

  fn available() -> BTreeSet<BranchKey> {
    BTreeSet::from([BranchKey::Yes, BranchKey::No])
  }

  #[tokio::test]
  async fn true_evaluation_selects_yes() {
    let node = condition("{{ data.x }}", "greater_than", json!("3"));
    let input = NodeOutput::new("p").with_entry("x", json!(5));

    let out = node.run(input.clone()).await.unwrap();
    assert_eq!(out.metadata["condition_result"], json!(true));
    assert_eq!(
      node.branches_to_follow(&input, &available()),
      BTreeSet::from([BranchKey::Yes])
    );
  }

  #[tokio::test]
  async fn false_evaluation_selects_no() {
    let node = condition("{{ data.x }}", "greater_than", json!("3"));
    let input = NodeOutput::new("p").with_entry("x", json!(1));

    node.run(input.clone()).await.unwrap();
    assert_eq!(
      node.branches_to_follow(&input, &available()),
      BTreeSet::from([BranchKey::No])
    );
    assert!(!node.state().last_result());
  }

  #[tokio::test]
  async fn unknown_operator_fails_the_iteration() {
    let node = condition("a", "resembles", json!("b"));
    let err = node.run(NodeOutput::new("p")).await.unwrap_err();
    assert!(err.to_string().contains("resembles"));
  }

  #[test]
  fn condition_requires_field_and_operator() {
    let node = Condition::new(
      NodeConfig::new("check", "condition"),
      Arc::new(OperatorRegistry::with_defaults()),
    );
    let readiness = node.is_ready();
    assert!(!readiness.is_ok());
    assert!(readiness.errors().contains_key("field"));
    assert!(readiness.errors().contains_key("operator"));
  }
}
