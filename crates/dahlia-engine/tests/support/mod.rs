//! Test nodes shared by the engine integration tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dahlia_node::{
  Node, NodeConfig, NodeDescriptor, NodeError, NodeOutput, NodeRegistry, NodeVariant, RunState,
};
use serde_json::{Map, Value, json};

/// Shared log of node activity: `run:<id>:<x>` per execution (with the `x`
/// data field when present) and `cleanup:<id>` per cleanup.
pub type ActivityLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> ActivityLog {
  Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &ActivityLog) -> Vec<String> {
  log.lock().unwrap().clone()
}

/// Producer that emits one preset value per iteration, then a completion
/// sentinel.
pub struct SequenceProducer {
  config: NodeConfig,
  state: RunState,
  values: Vec<Value>,
}

#[async_trait]
impl Node for SequenceProducer {
  fn identifier(&self) -> &str {
    "sequence"
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
    _form: Map<String, Value>,
    mut input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    let index = self.state().execution_count() as usize;
    let Some(value) = self.values.get(index) else {
      return Ok(NodeOutput::completion(&self.config.id));
    };
    input.data.insert("x".to_string(), value.clone());
    input.id = self.config.id.clone();
    Ok(input)
  }
}

/// Pass-through node recording every execution and cleanup.
pub struct Recorder {
  config: NodeConfig,
  state: RunState,
  variant: NodeVariant,
  log: ActivityLog,
}

#[async_trait]
impl Node for Recorder {
  fn identifier(&self) -> &str {
    &self.config.node_type
  }
  fn config(&self) -> &NodeConfig {
    &self.config
  }
  fn state(&self) -> &RunState {
    &self.state
  }
  fn variant(&self) -> NodeVariant {
    self.variant
  }

  async fn cleanup(&self, _input: Option<&NodeOutput>) -> Result<(), NodeError> {
    self.log.lock().unwrap().push(format!("cleanup:{}", self.config.id));
    Ok(())
  }

  async fn execute(
    &self,
    _form: Map<String, Value>,
    input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    let x = input.data.get("x").cloned().unwrap_or(Value::Null);
    self
      .log
      .lock()
      .unwrap()
      .push(format!("run:{}:{}", self.config.id, x));
    Ok(input)
  }
}

/// Node that always fails, for error-recovery tests.
pub struct AlwaysFails {
  config: NodeConfig,
  state: RunState,
}

#[async_trait]
impl Node for AlwaysFails {
  fn identifier(&self) -> &str {
    "always-fails"
  }
  fn config(&self) -> &NodeConfig {
    &self.config
  }
  fn state(&self) -> &RunState {
    &self.state
  }

  async fn execute(
    &self,
    _form: Map<String, Value>,
    _input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    Err(NodeError::execution(&self.config.id, "intentional failure"))
  }
}

/// Register a `sequence` producer emitting `values` then a sentinel.
pub fn register_sequence(registry: &mut NodeRegistry, values: Vec<Value>) {
  registry.register(
    NodeDescriptor::new("sequence", NodeVariant::Producer),
    move |config| {
      Ok(Arc::new(SequenceProducer {
        config,
        state: RunState::new(),
        values: values.clone(),
      }) as Arc<dyn Node>)
    },
  );
}

/// Register a blocking `recorder` and a non-blocking `finisher`, both logging
/// to `log`.
pub fn register_recorders(registry: &mut NodeRegistry, log: &ActivityLog) {
  for (identifier, variant) in [
    ("recorder", NodeVariant::Blocking),
    ("finisher", NodeVariant::NonBlocking),
  ] {
    let log = log.clone();
    registry.register(NodeDescriptor::new(identifier, variant), move |config| {
      Ok(Arc::new(Recorder {
        config,
        state: RunState::new(),
        variant,
        log: log.clone(),
      }) as Arc<dyn Node>)
    });
  }
}

pub fn register_always_fails(registry: &mut NodeRegistry) {
  registry.register(
    NodeDescriptor::new("always-fails", NodeVariant::Blocking),
    |config| {
      Ok(Arc::new(AlwaysFails {
        config,
        state: RunState::new(),
      }) as Arc<dyn Node>)
    },
  );
}

/// Shorthand for building a description from JSON.
pub fn def(raw: Value) -> dahlia_config::WorkflowDef {
  serde_json::from_value(raw).unwrap()
}

/// A condition node form comparing `{{ data.x }}` against a value.
pub fn condition_form(operator: &str, value: &str) -> Value {
  json!({
    "form": { "field": "{{ data.x }}", "operator": operator, "value": value }
  })
}
