//! Pre-execution validation.
//!
//! A priority-ordered registry: universal validators run first, then the
//! validators registered for the detected mode. The first failing validator
//! rejects the workflow.

use std::collections::HashMap;
use std::sync::Arc;

use dahlia_config::WorkflowKind;
use dahlia_graph::{Graph, analyzer};

use crate::error::EngineError;

/// One pre-execution check over the built graph.
pub trait Validator: Send + Sync {
  fn name(&self) -> &str;

  /// `Err` carries the human-readable report for the rejection.
  fn validate(&self, graph: &Graph, kind: WorkflowKind) -> Result<(), String>;
}

/// Universal + mode-specific validators, run in registration order.
pub struct ValidatorRegistry {
  universal: Vec<Arc<dyn Validator>>,
  by_mode: HashMap<WorkflowKind, Vec<Arc<dyn Validator>>>,
}

impl ValidatorRegistry {
  pub fn empty() -> Self {
    Self {
      universal: Vec::new(),
      by_mode: HashMap::new(),
    }
  }

  /// The standard rule set.
  pub fn with_defaults() -> Self {
    let mut registry = Self::empty();
    registry.register_universal(Arc::new(GraphShapeValidator));
    registry.register_universal(Arc::new(NodeReadinessValidator));
    registry.register(WorkflowKind::Production, Arc::new(ProductionValidator));
    registry.register(WorkflowKind::Api, Arc::new(ApiValidator));
    registry.register(WorkflowKind::SingleNode, Arc::new(SingleNodeValidator));
    registry
  }

  pub fn register_universal(&mut self, validator: Arc<dyn Validator>) {
    self.universal.push(validator);
  }

  pub fn register(&mut self, kind: WorkflowKind, validator: Arc<dyn Validator>) {
    self.by_mode.entry(kind).or_default().push(validator);
  }

  /// Run every applicable validator; the first failure rejects the workflow.
  pub fn run(&self, graph: &Graph, kind: WorkflowKind) -> Result<(), EngineError> {
    let mode_specific = self.by_mode.get(&kind).map(Vec::as_slice).unwrap_or(&[]);
    for validator in self.universal.iter().chain(mode_specific) {
      validator
        .validate(graph, kind)
        .map_err(|report| EngineError::Validation { report })?;
    }
    Ok(())
  }
}

impl Default for ValidatorRegistry {
  fn default() -> Self {
    Self::with_defaults()
  }
}

/// Rejects structurally empty workflows.
struct GraphShapeValidator;

impl Validator for GraphShapeValidator {
  fn name(&self) -> &str {
    "graph-shape"
  }

  fn validate(&self, graph: &Graph, _kind: WorkflowKind) -> Result<(), String> {
    if graph.is_empty() {
      return Err("no nodes".to_string());
    }
    Ok(())
  }
}

/// Aggregates `is_ready` failures across every node into one report.
struct NodeReadinessValidator;

impl Validator for NodeReadinessValidator {
  fn name(&self) -> &str {
    "node-readiness"
  }

  fn validate(&self, graph: &Graph, _kind: WorkflowKind) -> Result<(), String> {
    let mut lines = Vec::new();
    for node in graph.iter() {
      let readiness = node.instance().is_ready();
      if !readiness.is_ok() {
        lines.push(readiness.describe(node.id()));
      }
    }
    if lines.is_empty() {
      Ok(())
    } else {
      Err(lines.join("\n"))
    }
  }
}

/// Production workflows need a producer and must not contain respond nodes.
struct ProductionValidator;

impl Validator for ProductionValidator {
  fn name(&self) -> &str {
    "production-rules"
  }

  fn validate(&self, graph: &Graph, _kind: WorkflowKind) -> Result<(), String> {
    if analyzer::producers(graph).is_empty() {
      return Err("production workflow requires at least one producer".to_string());
    }
    for node in graph.iter() {
      if node.instance().emits_response() {
        return Err(format!(
          "production workflow cannot contain response node '{}'",
          node.id()
        ));
      }
    }
    Ok(())
  }
}

/// API workflows are producer-free with exactly one entry node.
struct ApiValidator;

impl Validator for ApiValidator {
  fn name(&self) -> &str {
    "api-rules"
  }

  fn validate(&self, graph: &Graph, _kind: WorkflowKind) -> Result<(), String> {
    if !analyzer::producers(graph).is_empty() {
      return Err("api workflow cannot contain producers".to_string());
    }
    let entries = analyzer::entry_ids(graph);
    if entries.len() != 1 {
      return Err(format!(
        "api workflow requires exactly one entry node, found {}",
        entries.len()
      ));
    }
    Ok(())
  }
}

/// Single-node workflows are exactly one node.
struct SingleNodeValidator;

impl Validator for SingleNodeValidator {
  fn name(&self) -> &str {
    "single-node-rules"
  }

  fn validate(&self, graph: &Graph, _kind: WorkflowKind) -> Result<(), String> {
    if graph.len() != 1 {
      return Err(format!(
        "single-node workflow requires exactly one node, found {}",
        graph.len()
      ));
    }
    Ok(())
  }
}
