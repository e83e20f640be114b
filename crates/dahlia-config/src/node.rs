use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A node in a workflow description.
///
/// `id` must be unique within the workflow and `node_type` must resolve in
/// the node registry. The `data` bag is opaque to the description layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub id: String,
  #[serde(rename = "type")]
  pub node_type: String,
  #[serde(default)]
  pub data: NodeData,
}

/// Per-node configuration split into two sub-maps.
///
/// `form` holds the user-facing configuration and may contain `{{ … }}`
/// template expressions rendered at execution time. `config` holds wiring
/// hints written by pre-processors (queue names and the like).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
  #[serde(default)]
  pub form: Map<String, Value>,
  #[serde(default)]
  pub config: Map<String, Value>,
}
