//! Mode-specific execution drivers.

mod api;
mod production;
mod single_node;

pub use api::ApiStrategy;
pub use production::ProductionStrategy;
pub use single_node::SingleNodeStrategy;

use async_trait::async_trait;
use dahlia_node::NodeOutput;
use serde_json::Value;

use crate::error::EngineError;

/// Common contract of the mode drivers.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
  /// Resolve entry points and initialize nodes.
  async fn prepare(&self) -> Result<(), EngineError>;

  /// Run the workflow. Production returns `None` after its loops terminate;
  /// one-shot modes return the final output.
  async fn execute(&self, input: Option<Value>) -> Result<Option<NodeOutput>, EngineError>;

  async fn shutdown(&self, force: bool);
}

/// Wrap a caller-provided request payload into the seed output for a
/// one-shot run.
pub(crate) fn seed_output(id: &str, input: Option<Value>) -> NodeOutput {
  let mut seed = NodeOutput::new(id);
  match input {
    Some(Value::Object(map)) => seed.data = map,
    Some(Value::Null) | None => {}
    Some(other) => {
      seed.data.insert("input".to_string(), other);
    }
  }
  seed
}
