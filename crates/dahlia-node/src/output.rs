use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata flag marking a completion sentinel.
pub const COMPLETION_FLAG: &str = "__execution_completed__";

/// Metadata flag set by respond nodes once a response payload is ready.
pub const RESPONSE_READY: &str = "response_ready";

/// Output of a single node run.
///
/// `data` is the payload accreting across a chain of nodes; `metadata`
/// carries provenance (source node id, operation, iteration index). A
/// distinguished output with [`COMPLETION_FLAG`] set is the completion
/// sentinel that triggers cleanup semantics in the scheduler; the flag is
/// preserved through JSON serialization so sentinels survive queue hops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
  pub id: String,
  #[serde(default)]
  pub data: Map<String, Value>,
  #[serde(default)]
  pub metadata: Map<String, Value>,
}

impl NodeOutput {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      data: Map::new(),
      metadata: Map::new(),
    }
  }

  /// Create a completion sentinel attributed to `id`.
  pub fn completion(id: impl Into<String>) -> Self {
    let mut output = Self::new(id);
    output.metadata.insert(COMPLETION_FLAG.to_string(), Value::Bool(true));
    output
  }

  pub fn is_completion(&self) -> bool {
    matches!(self.metadata.get(COMPLETION_FLAG), Some(Value::Bool(true)))
  }

  /// Whether a respond node marked this output as the workflow's response.
  pub fn signals_response(&self) -> bool {
    matches!(self.metadata.get(RESPONSE_READY), Some(Value::Bool(true)))
  }

  pub fn with_entry(mut self, key: impl Into<String>, value: Value) -> Self {
    self.data.insert(key.into(), value);
    self
  }

  /// Record provenance metadata for this output.
  pub fn note_provenance(&mut self, source: &str, operation: &str, iteration: u64) {
    self.metadata.insert("source".to_string(), Value::String(source.to_string()));
    self
      .metadata
      .insert("operation".to_string(), Value::String(operation.to_string()));
    self.metadata.insert("iteration".to_string(), Value::from(iteration));
  }

  pub fn to_value(&self) -> Result<Value, serde_json::Error> {
    serde_json::to_value(self)
  }

  pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
    serde_json::from_value(value)
  }
}

/// First key derived from `base` that does not collide with `data`.
///
/// Returns `base`, then `base_2`, `base_3`, … so multiple instances of the
/// same node type can merge their outputs into one `data` map. Deterministic
/// for a given map and sequence of prior writes.
pub fn unique_key(data: &Map<String, Value>, base: &str) -> String {
  if !data.contains_key(base) {
    return base.to_string();
  }
  let mut n = 2usize;
  loop {
    let candidate = format!("{base}_{n}");
    if !data.contains_key(&candidate) {
      return candidate;
    }
    n += 1;
  }
}
