use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::branch::BranchKey;
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::form::render_form;
use crate::output::{NodeOutput, unique_key};

/// Class-level behavior tag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeVariant {
  /// No inputs; drives one loop.
  Producer,
  /// Executes and lets the scheduler keep descending.
  Blocking,
  /// Executes; the scheduler must not descend past it in the same iteration.
  NonBlocking,
  /// Selects one of the `yes`/`no` branches for the scheduler.
  Conditional,
}

/// Execution pool a node prefers for its body.
///
/// Ordered by escalation priority: an iteration runs on the heaviest pool any
/// touched node prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
  Cooperative,
  WorkerThread,
  WorkerProcess,
}

impl std::fmt::Display for PoolKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      PoolKind::Cooperative => "cooperative",
      PoolKind::WorkerThread => "worker_thread",
      PoolKind::WorkerProcess => "worker_process",
    };
    f.write_str(name)
  }
}

/// Result of a structural readiness check.
///
/// Collects per-field failure messages; an empty report means the node is
/// ready. Fields holding template expressions are only checked for presence
/// here - strict validation runs after rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readiness {
  errors: BTreeMap<String, Vec<String>>,
}

impl Readiness {
  pub fn ok() -> Self {
    Self::default()
  }

  pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
    self.errors.entry(field.into()).or_default().push(message.into());
  }

  pub fn is_ok(&self) -> bool {
    self.errors.is_empty()
  }

  pub fn errors(&self) -> &BTreeMap<String, Vec<String>> {
    &self.errors
  }

  /// Format the report as `<node_id>: <field>: <message>` lines.
  pub fn describe(&self, node_id: &str) -> String {
    let mut lines = Vec::new();
    for (field, messages) in &self.errors {
      for message in messages {
        lines.push(format!("{node_id}: {field}: {message}"));
      }
    }
    lines.join("\n")
  }
}

#[derive(Debug, Default, Clone)]
struct BranchDecision {
  selected: Option<BranchKey>,
  last_result: bool,
}

/// Mutable per-run state shared by all node implementations.
///
/// Instances are shared behind `Arc` and iterations within one loop are
/// strictly sequential, so plain interior mutability is enough here.
#[derive(Debug, Default)]
pub struct RunState {
  count: AtomicU64,
  branch: Mutex<BranchDecision>,
}

impl RunState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn execution_count(&self) -> u64 {
    self.count.load(Ordering::SeqCst)
  }

  /// Increment the execution counter, returning the new value.
  pub fn bump(&self) -> u64 {
    self.count.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// Record a conditional decision: `true` selects `yes`, `false` selects `no`.
  pub fn record_decision(&self, outcome: bool) {
    let mut branch = self.branch.lock().unwrap_or_else(PoisonError::into_inner);
    branch.selected = Some(if outcome { BranchKey::Yes } else { BranchKey::No });
    branch.last_result = outcome;
  }

  /// The branch selected by the most recent decision, if any.
  pub fn selected_branch(&self) -> Option<BranchKey> {
    self
      .branch
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .selected
      .clone()
  }

  pub fn last_result(&self) -> bool {
    self
      .branch
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .last_result
  }
}

/// The polymorphic node contract the scheduler depends on.
///
/// Implementations hold their [`NodeConfig`] and a [`RunState`]; everything
/// the scheduler calls is defined here, and most methods have defaults so a
/// typical node only implements `execute` plus the class-level tags.
#[async_trait]
pub trait Node: Send + Sync {
  /// Stable kebab-case tag used by the registry.
  fn identifier(&self) -> &str;

  /// The instance's descriptor. Ships across the worker-process boundary.
  fn config(&self) -> &NodeConfig;

  /// Shared mutable per-run state.
  fn state(&self) -> &RunState;

  fn variant(&self) -> NodeVariant {
    NodeVariant::Blocking
  }

  fn preferred_pool(&self) -> PoolKind {
    PoolKind::Cooperative
  }

  /// Form fields that must be present and non-empty before execution.
  fn required_fields(&self) -> &[&str] {
    &[]
  }

  /// Whether this node pushes outputs onto a durable queue.
  fn writes_queue(&self) -> bool {
    false
  }

  /// Whether this node pops its inputs from a durable queue.
  fn reads_queue(&self) -> bool {
    false
  }

  /// Whether this node produces the workflow's response in API mode.
  fn emits_response(&self) -> bool {
    false
  }

  /// Structural configuration check.
  ///
  /// The default verifies every required field is present and non-empty.
  /// Template-bearing fields are deliberately only checked for presence -
  /// they render against upstream data that does not exist yet.
  fn is_ready(&self) -> Readiness {
    let mut readiness = Readiness::ok();
    for field in self.required_fields() {
      match self.config().form.get(*field) {
        None | Some(Value::Null) => readiness.add(*field, "missing required field"),
        Some(Value::String(s)) if s.trim().is_empty() => {
          readiness.add(*field, "required field is empty");
        }
        Some(_) => {}
      }
    }
    readiness
  }

  /// Acquire resources. Called once before the first iteration, and again in
  /// a worker process before each dispatched run.
  async fn setup(&self) -> Result<(), NodeError> {
    Ok(())
  }

  /// Release resources. Receives the completion sentinel when draining.
  async fn cleanup(&self, input: Option<&NodeOutput>) -> Result<(), NodeError> {
    let _ = input;
    Ok(())
  }

  /// Validate then acquire resources.
  async fn initialize(&self) -> Result<(), NodeError> {
    let readiness = self.is_ready();
    if !readiness.is_ok() {
      return Err(NodeError::NotReady {
        node_id: self.config().id.clone(),
        report: readiness.describe(&self.config().id),
      });
    }
    self.setup().await
  }

  /// Render the form against the incoming output and re-validate it.
  fn populate_form(&self, input: &NodeOutput) -> Result<Map<String, Value>, NodeError> {
    let config = self.config();
    let rendered = render_form(&config.id, &config.form, input)?;
    for field in self.required_fields() {
      if let Some(Value::String(s)) = rendered.get(*field)
        && s.trim().is_empty()
      {
        return Err(NodeError::Template {
          node_id: config.id.clone(),
          field: (*field).to_string(),
          message: "required field resolved to an empty value".to_string(),
        });
      }
    }
    Ok(rendered)
  }

  /// The node's work. Receives the rendered form and the incoming output.
  async fn execute(
    &self,
    form: Map<String, Value>,
    input: NodeOutput,
  ) -> Result<NodeOutput, NodeError>;

  /// Composite entry point used by the pool executor.
  ///
  /// A completion sentinel short-circuits into `cleanup` and passes through
  /// unchanged; anything else renders the form, executes and bumps the
  /// execution counter.
  async fn run(&self, input: NodeOutput) -> Result<NodeOutput, NodeError> {
    if input.is_completion() {
      self.cleanup(Some(&input)).await?;
      return Ok(input);
    }
    let form = self.populate_form(&input)?;
    let output = self.execute(form, input).await?;
    self.state().bump();
    Ok(output)
  }

  /// Which outgoing branch keys the scheduler should descend into.
  fn branches_to_follow(
    &self,
    input: &NodeOutput,
    available: &BTreeSet<BranchKey>,
  ) -> BTreeSet<BranchKey> {
    if input.is_completion() {
      return available.clone();
    }
    match self.variant() {
      NodeVariant::Conditional => self.state().selected_branch().into_iter().collect(),
      _ => BTreeSet::from([BranchKey::Default]),
    }
  }

  /// Whether the scheduler may descend past this node in the same iteration.
  fn continue_after_execution(&self) -> bool {
    self.variant() != NodeVariant::NonBlocking
  }

  /// First name derived from `base` not colliding with the input's data keys.
  fn unique_output_key(&self, input: &NodeOutput, base: &str) -> String {
    unique_key(&input.data, base)
  }
}
