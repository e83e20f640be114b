//! The top-level orchestrator.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dahlia_broker::Broker;
use dahlia_config::{WorkflowDef, WorkflowKind};
use dahlia_events::{
  ChannelNotifier, EventBus, ExecutionEvent, StateTracker, WorkflowState,
};
use dahlia_graph::Graph;
use dahlia_node::{NodeOutput, NodeRegistry, PoolKind};
use dahlia_pool::{PoolConfig, PoolExecutor};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::EngineError;
use crate::mode;
use crate::preprocess::PreprocessorRegistry;
use crate::strategy::{
  ApiStrategy, ExecutionStrategy, ProductionStrategy, SingleNodeStrategy, seed_output,
};
use crate::validate::ValidatorRegistry;

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub pools: PoolConfig,
  /// Pause after a failed iteration before the next one starts.
  pub error_backoff: Duration,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      pools: PoolConfig::default(),
      error_backoff: Duration::from_secs(1),
    }
  }
}

/// A workflow that passed the load pipeline: mode detected, graph built,
/// validated and pre-processed. Frozen from here on.
#[derive(Debug)]
pub struct PreparedWorkflow {
  pub workflow_id: String,
  pub kind: WorkflowKind,
  pub graph: Arc<Graph>,
}

/// Top-level orchestrator: load → validate → pre-process → execute.
///
/// All collaborators are constructor-injected; [`Engine::new`] wires the
/// defaults.
pub struct Engine {
  registry: Arc<NodeRegistry>,
  broker: Broker,
  pools: Arc<PoolExecutor>,
  validators: ValidatorRegistry,
  preprocessors: PreprocessorRegistry,
  config: EngineConfig,
}

impl Engine {
  pub fn new(registry: Arc<NodeRegistry>, broker: Broker) -> Self {
    Self::with_config(registry, broker, EngineConfig::default())
  }

  pub fn with_config(registry: Arc<NodeRegistry>, broker: Broker, config: EngineConfig) -> Self {
    Self {
      registry,
      broker,
      pools: Arc::new(PoolExecutor::new(config.pools.clone())),
      validators: ValidatorRegistry::with_defaults(),
      preprocessors: PreprocessorRegistry::with_defaults(),
      config,
    }
  }

  /// Registration point for additional validators.
  pub fn validators_mut(&mut self) -> &mut ValidatorRegistry {
    &mut self.validators
  }

  /// Registration point for additional pre-processors.
  pub fn preprocessors_mut(&mut self) -> &mut PreprocessorRegistry {
    &mut self.preprocessors
  }

  pub fn broker(&self) -> &Broker {
    &self.broker
  }

  /// Run the load pipeline over a description.
  pub fn load(
    &self,
    workflow_id: impl Into<String>,
    def: &WorkflowDef,
  ) -> Result<PreparedWorkflow, EngineError> {
    let workflow_id = workflow_id.into();
    let kind = mode::detect(def, &self.registry);
    info!(workflow_id = %workflow_id, kind = %kind, "workflow_loading");

    let mut graph = dahlia_graph::build(def, &self.registry)?;
    self.validators.run(&graph, kind)?;
    self.preprocessors.run(&mut graph, kind)?;

    info!(
      workflow_id = %workflow_id,
      nodes = graph.len(),
      "workflow_loaded"
    );
    Ok(PreparedWorkflow {
      workflow_id,
      kind,
      graph: Arc::new(graph),
    })
  }

  /// Start a production workflow's loops. Returns a handle for lifecycle
  /// control and observation; the loops run until drained or stopped.
  pub async fn start(&self, prepared: &PreparedWorkflow) -> Result<WorkflowHandle, EngineError> {
    if prepared.kind != WorkflowKind::Production {
      return Err(EngineError::validation(format!(
        "start requires a production workflow, got {}",
        prepared.kind
      )));
    }

    let bus = Arc::new(EventBus::new());
    let tracker = Arc::new(StateTracker::new(&prepared.workflow_id));
    bus.subscribe(tracker.clone());
    let (notifier, events) = ChannelNotifier::pair();
    bus.subscribe(Arc::new(notifier));

    let cancel = CancellationToken::new();
    let strategy = Arc::new(ProductionStrategy::new(
      prepared.workflow_id.clone(),
      prepared.graph.clone(),
      self.pools.clone(),
      bus.clone(),
      cancel,
      self.config.error_backoff,
    )?);
    strategy.prepare().await?;

    let task = {
      let strategy = strategy.clone();
      tokio::spawn(async move { strategy.execute(None).await.map(|_| ()) })
    };

    Ok(WorkflowHandle {
      workflow_id: prepared.workflow_id.clone(),
      strategy,
      tracker,
      bus,
      events: Mutex::new(Some(events)),
      task: Mutex::new(Some(task)),
    })
  }

  /// One-shot request/response or single-node execution.
  pub async fn execute(
    &self,
    prepared: &PreparedWorkflow,
    input: Option<Value>,
  ) -> Result<NodeOutput, EngineError> {
    let execution_id = uuid::Uuid::new_v4().to_string();
    info!(
      workflow_id = %prepared.workflow_id,
      execution_id = %execution_id,
      kind = %prepared.kind,
      "execution_started"
    );

    let bus = Arc::new(EventBus::new());
    let tracker = Arc::new(StateTracker::new(&prepared.workflow_id));
    bus.subscribe(tracker);
    let cancel = CancellationToken::new();

    let strategy: Box<dyn ExecutionStrategy> = match prepared.kind {
      WorkflowKind::Api => Box::new(ApiStrategy::new(
        prepared.workflow_id.clone(),
        prepared.graph.clone(),
        self.pools.clone(),
        bus,
        cancel,
      )),
      WorkflowKind::SingleNode => Box::new(SingleNodeStrategy::new(
        prepared.workflow_id.clone(),
        prepared.graph.clone(),
        self.pools.clone(),
        bus,
        cancel,
      )),
      WorkflowKind::Production => {
        return Err(EngineError::validation(
          "production workflows run via start, not execute",
        ));
      }
    };

    strategy.prepare().await?;
    let output = strategy.execute(input).await?;
    output.ok_or_else(|| EngineError::validation("workflow produced no output"))
  }

  /// Development-mode single-node invocation over any prepared graph.
  ///
  /// Without an explicit input, the immediate predecessors' outputs are
  /// resolved from the cache (`<node_id>_output` keys) so the node under
  /// test sees its inputs without rerunning the whole graph. The node's own
  /// output is written back under the same scheme.
  pub async fn execute_node(
    &self,
    prepared: &PreparedWorkflow,
    node_id: &str,
    input: Option<Value>,
  ) -> Result<NodeOutput, EngineError> {
    let execution_id = uuid::Uuid::new_v4().to_string();
    info!(
      workflow_id = %prepared.workflow_id,
      execution_id = %execution_id,
      node_id = %node_id,
      "node_execution_started"
    );

    let node = prepared
      .graph
      .lookup(node_id)
      .ok_or_else(|| EngineError::MissingNode {
        node_id: node_id.to_string(),
      })?;

    let seed = match input {
      Some(input) => seed_output(node_id, Some(input)),
      None => self.upstream_from_cache(prepared, node_id).await?,
    };

    node.instance().initialize().await?;
    let output = self
      .pools
      .run(PoolKind::Cooperative, node.instance().clone(), seed)
      .await?;

    let key = format!("{node_id}_output");
    let value = output.to_value().map_err(|source| {
      EngineError::Node(dahlia_node::NodeError::Serialization {
        node_id: node_id.to_string(),
        source,
      })
    })?;
    self.broker.cache.set(&key, &value, None).await?;
    info!(node_id = %node_id, cache_key = %key, "node output cached");

    Ok(output)
  }

  /// Materialize a node's input from its immediate predecessors' cached
  /// outputs.
  async fn upstream_from_cache(
    &self,
    prepared: &PreparedWorkflow,
    node_id: &str,
  ) -> Result<NodeOutput, EngineError> {
    let mut seed = NodeOutput::new(node_id);
    for upstream in prepared.graph.upstream_of(node_id) {
      let key = format!("{upstream}_output");
      let Some(value) = self.broker.cache.get(&key).await? else {
        continue;
      };
      match NodeOutput::from_value(value.clone()) {
        Ok(output) => seed.data.extend(output.data),
        // A plain object in the cache counts as a bare data map.
        Err(_) => {
          if let Value::Object(map) = value {
            seed.data.extend(map);
          }
        }
      }
    }
    Ok(seed)
  }

  /// Tear down the shared pools.
  pub async fn shutdown(&self, force: bool) {
    self.pools.shutdown(force).await;
  }
}

/// Handle on a started production workflow.
pub struct WorkflowHandle {
  workflow_id: String,
  strategy: Arc<ProductionStrategy>,
  tracker: Arc<StateTracker>,
  bus: Arc<EventBus>,
  events: Mutex<Option<UnboundedReceiver<ExecutionEvent>>>,
  task: Mutex<Option<JoinHandle<Result<(), EngineError>>>>,
}

impl WorkflowHandle {
  pub fn workflow_id(&self) -> &str {
    &self.workflow_id
  }

  /// Soft stop: loops finish their current iteration, drain and exit.
  pub async fn stop(&self) {
    self.strategy.shutdown(false).await;
  }

  /// Hard stop: cancel loops mid-iteration, kill in-flight jobs.
  pub async fn force_stop(&self) {
    self.strategy.shutdown(true).await;
  }

  /// Consistent snapshot of the tracked execution state.
  pub fn status(&self) -> WorkflowState {
    self.tracker.snapshot()
  }

  /// The event stream receiver; available once.
  pub fn events(&self) -> Option<UnboundedReceiver<ExecutionEvent>> {
    self
      .events
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
  }

  /// The workflow's event bus, for additional subscribers.
  pub fn bus(&self) -> &Arc<EventBus> {
    &self.bus
  }

  /// Wait for every loop to terminate.
  pub async fn wait(&self) -> Result<(), EngineError> {
    let task = self
      .task
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    match task {
      Some(task) => task.await.unwrap_or_else(|e| {
        Err(EngineError::Task {
          message: e.to_string(),
        })
      }),
      None => Ok(()),
    }
  }
}
