use serde::{Deserialize, Serialize};

use crate::edge::EdgeDef;
use crate::kind::WorkflowKind;
use crate::node::NodeDef;

/// A declarative workflow description.
///
/// This is the wire format accepted by the engine:
///
/// ```json
/// {
///   "workflow_type": "production",
///   "nodes": [ { "id": "a", "type": "interval-trigger", "data": { "form": {}, "config": {} } } ],
///   "edges": [ { "source": "a", "target": "b", "sourceHandle": null } ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workflow_type: Option<WorkflowKind>,
  #[serde(default)]
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub edges: Vec<EdgeDef>,
}

impl WorkflowDef {
  /// Look up a node definition by id.
  pub fn node(&self, id: &str) -> Option<&NodeDef> {
    self.nodes.iter().find(|n| n.id == id)
  }
}
