//! Execution-mode detection.

use dahlia_config::{WorkflowDef, WorkflowKind};
use dahlia_node::{NodeRegistry, NodeVariant};

/// Classify a workflow description.
///
/// Detection order: an explicit `workflow_type` wins; a producer anywhere
/// makes the workflow `production`; exactly one node makes it `single_node`;
/// everything else (including an empty description - validation rejects it
/// later) is `api`.
pub fn detect(def: &WorkflowDef, registry: &NodeRegistry) -> WorkflowKind {
  if let Some(kind) = def.workflow_type {
    return kind;
  }

  let has_producer = def.nodes.iter().any(|node| {
    registry
      .descriptor(&node.node_type)
      .is_some_and(|descriptor| descriptor.variant == NodeVariant::Producer)
  });
  if has_producer {
    return WorkflowKind::Production;
  }

  if def.nodes.len() == 1 {
    return WorkflowKind::SingleNode;
  }

  WorkflowKind::Api
}
