//! Pre-execution graph mutations.
//!
//! Pre-processors run after validation, universal entries first, then the
//! entries registered for the detected mode. They are the only phase allowed
//! to mutate the graph; afterwards it is frozen for the run.

use std::collections::HashMap;
use std::sync::Arc;

use dahlia_config::WorkflowKind;
use dahlia_graph::Graph;
use dahlia_node::QUEUE_NAME_KEY;
use serde_json::json;
use tracing::debug;

use crate::error::EngineError;

/// One graph mutation applied before execution.
pub trait Preprocessor: Send + Sync {
  fn name(&self) -> &str;

  fn apply(&self, graph: &mut Graph, kind: WorkflowKind) -> Result<(), String>;
}

/// Universal + mode-specific pre-processors, run in registration order.
pub struct PreprocessorRegistry {
  universal: Vec<Arc<dyn Preprocessor>>,
  by_mode: HashMap<WorkflowKind, Vec<Arc<dyn Preprocessor>>>,
}

impl PreprocessorRegistry {
  pub fn empty() -> Self {
    Self {
      universal: Vec::new(),
      by_mode: HashMap::new(),
    }
  }

  pub fn with_defaults() -> Self {
    let mut registry = Self::empty();
    registry.register_universal(Arc::new(QueueNamer));
    registry
  }

  pub fn register_universal(&mut self, preprocessor: Arc<dyn Preprocessor>) {
    self.universal.push(preprocessor);
  }

  pub fn register(&mut self, kind: WorkflowKind, preprocessor: Arc<dyn Preprocessor>) {
    self.by_mode.entry(kind).or_default().push(preprocessor);
  }

  pub fn run(&self, graph: &mut Graph, kind: WorkflowKind) -> Result<(), EngineError> {
    let mode_specific = self.by_mode.get(&kind).map(Vec::as_slice).unwrap_or(&[]);
    for preprocessor in self.universal.iter().chain(mode_specific) {
      preprocessor
        .apply(graph, kind)
        .map_err(|message| EngineError::Preprocess {
          name: preprocessor.name().to_string(),
          message,
        })?;
    }
    Ok(())
  }
}

impl Default for PreprocessorRegistry {
  fn default() -> Self {
    Self::with_defaults()
  }
}

/// Assigns canonical queue names to writer → reader edges.
///
/// For every edge from a queue-writer to a queue-reader, the channel
/// `queue_<from_id>_<to_id>` is written into both endpoints' wiring configs
/// unless a name is already set. Users can build graphs without naming
/// queues, and each pair gets an unambiguous channel.
pub struct QueueNamer;

impl Preprocessor for QueueNamer {
  fn name(&self) -> &str {
    "queue-namer"
  }

  fn apply(&self, graph: &mut Graph, _kind: WorkflowKind) -> Result<(), String> {
    for node in graph.iter() {
      if !node.instance().writes_queue() {
        continue;
      }
      for target in node.downstream_ids() {
        let Some(reader) = graph.lookup(target) else {
          continue;
        };
        if !reader.instance().reads_queue() {
          continue;
        }

        let queue = format!("queue_{}_{}", node.id(), reader.id());
        let named_writer = node
          .instance()
          .config()
          .wiring_set_if_absent(QUEUE_NAME_KEY, json!(queue.clone()));
        let named_reader = reader
          .instance()
          .config()
          .wiring_set_if_absent(QUEUE_NAME_KEY, json!(queue.clone()));
        if named_writer || named_reader {
          debug!(
            writer = %node.id(),
            reader = %reader.id(),
            queue = %queue,
            "queue channel assigned"
          );
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  struct Recording {
    label: &'static str,
    order: Arc<Mutex<Vec<&'static str>>>,
  }

  impl Preprocessor for Recording {
    fn name(&self) -> &str {
      self.label
    }

    fn apply(&self, _graph: &mut Graph, _kind: WorkflowKind) -> Result<(), String> {
      self.order.lock().unwrap().push(self.label);
      Ok(())
    }
  }

  #[test]
  fn universal_preprocessors_run_before_mode_specific_ones() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PreprocessorRegistry::empty();
    registry.register(
      WorkflowKind::Production,
      Arc::new(Recording {
        label: "production-only",
        order: order.clone(),
      }),
    );
    registry.register_universal(Arc::new(Recording {
      label: "universal",
      order: order.clone(),
    }));

    let mut graph = Graph::new();
    registry.run(&mut graph, WorkflowKind::Production).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["universal", "production-only"]);
  }

  #[test]
  fn a_failing_preprocessor_names_itself() {
    struct Fails;
    impl Preprocessor for Fails {
      fn name(&self) -> &str {
        "broken"
      }
      fn apply(&self, _graph: &mut Graph, _kind: WorkflowKind) -> Result<(), String> {
        Err("bad wiring".to_string())
      }
    }

    let mut registry = PreprocessorRegistry::empty();
    registry.register_universal(Arc::new(Fails));

    let mut graph = Graph::new();
    let err = registry.run(&mut graph, WorkflowKind::Api).unwrap_err();
    assert!(
      matches!(err, EngineError::Preprocess { name, message } if name == "broken" && message == "bad wiring")
    );
  }
}
