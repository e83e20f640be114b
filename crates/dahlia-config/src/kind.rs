use serde::{Deserialize, Serialize};

/// Execution mode of a workflow.
///
/// May be declared explicitly in the description as `workflow_type`; when
/// absent the engine infers it from the graph (a producer makes the workflow
/// `production`, a single node makes it `single_node`, anything else is `api`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
  Production,
  Api,
  SingleNode,
}

impl std::fmt::Display for WorkflowKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      WorkflowKind::Production => "production",
      WorkflowKind::Api => "api",
      WorkflowKind::SingleNode => "single_node",
    };
    f.write_str(name)
  }
}
