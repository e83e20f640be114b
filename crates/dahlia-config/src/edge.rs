use serde::{Deserialize, Serialize};

/// A directed edge between two nodes in a workflow description.
///
/// `source_handle` carries the branch label as emitted by the editor
/// (`"yes"`, `"no"`, `null`, or a user-declared handle). The graph builder
/// normalizes it into a canonical branch key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDef {
  pub source: String,
  pub target: String,
  #[serde(rename = "sourceHandle", default)]
  pub source_handle: Option<String>,
}
