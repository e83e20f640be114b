use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;

use dahlia_broker::Broker;
use dahlia_config::WorkflowDef;
use dahlia_engine::{Engine, EngineConfig};
use dahlia_node::NodeRegistry;
use dahlia_nodes::register_defaults;
use dahlia_pool::{PoolConfig, WorkerCommand, run_worker_loop};

/// Dahlia - a workflow orchestrator driving node graphs as production loops
#[derive(Parser)]
#[command(name = "dahlia")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Redis connection URL; without it an in-process broker is used
  #[arg(long, global = true)]
  redis_url: Option<String>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow or a single node
  Run {
    #[command(subcommand)]
    target: RunTarget,
  },

  /// Serve process-pool jobs over stdin/stdout (spawned by the engine)
  #[command(hide = true)]
  Worker,
}

#[derive(Subcommand)]
enum RunTarget {
  /// Start a production workflow's loops; Ctrl-C stops them gracefully
  Workflow {
    /// Path to the workflow description (JSON)
    workflow_file: PathBuf,
  },

  /// Execute an api workflow once, with an optional JSON payload on stdin
  Request {
    /// Path to the workflow description (JSON)
    workflow_file: PathBuf,
  },

  /// Execute a single node in development mode, resolving upstream inputs
  /// from the cache
  Node {
    /// Path to the workflow description (JSON)
    workflow_file: PathBuf,

    /// The node id to execute
    #[arg(long)]
    node: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  match cli.command {
    Commands::Run { target } => match target {
      RunTarget::Workflow { workflow_file } => run_workflow(workflow_file, cli.redis_url).await,
      RunTarget::Request { workflow_file } => run_request(workflow_file, cli.redis_url).await,
      RunTarget::Node {
        workflow_file,
        node,
      } => run_node(workflow_file, node, cli.redis_url).await,
    },
    Commands::Worker => run_worker(cli.redis_url).await,
  }
}

async fn broker_for(redis_url: &Option<String>) -> Result<Broker> {
  match redis_url {
    Some(url) => Broker::redis(url)
      .await
      .with_context(|| format!("failed to connect to redis at {url}")),
    None => Ok(Broker::in_memory()),
  }
}

async fn engine_for(redis_url: &Option<String>) -> Result<Engine> {
  let broker = broker_for(redis_url).await?;
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);

  // Worker processes are started from this same binary; pass the broker
  // selection through so nodes in the child see the same substrate.
  let mut worker_args = vec!["worker".to_string()];
  if let Some(url) = redis_url {
    worker_args.push("--redis-url".to_string());
    worker_args.push(url.clone());
  }
  let config = EngineConfig {
    pools: PoolConfig {
      worker_command: WorkerCommand::current_exe(worker_args).ok(),
      ..PoolConfig::default()
    },
    ..EngineConfig::default()
  };

  Ok(Engine::with_config(Arc::new(registry), broker, config))
}

async fn load_def(workflow_file: &PathBuf) -> Result<(String, WorkflowDef)> {
  let raw = tokio::fs::read_to_string(workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
  let def: WorkflowDef = serde_json::from_str(&raw)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;

  let workflow_id = workflow_file
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_else(|| "workflow".to_string());
  Ok((workflow_id, def))
}

fn read_payload_from_stdin() -> Result<Option<serde_json::Value>> {
  let mut raw = String::new();
  std::io::stdin()
    .read_to_string(&mut raw)
    .context("failed to read payload from stdin")?;
  if raw.trim().is_empty() {
    return Ok(None);
  }
  let payload = serde_json::from_str(&raw).context("payload is not valid JSON")?;
  Ok(Some(payload))
}

async fn run_workflow(workflow_file: PathBuf, redis_url: Option<String>) -> Result<()> {
  let engine = engine_for(&redis_url).await?;
  let (workflow_id, def) = load_def(&workflow_file).await?;

  let prepared = engine.load(&workflow_id, &def)?;
  let handle = Arc::new(engine.start(&prepared).await?);
  eprintln!("started workflow '{workflow_id}'; Ctrl-C to stop");

  // Stream lifecycle events as JSON lines; this is the push channel.
  if let Some(mut events) = handle.events() {
    tokio::spawn(async move {
      while let Some(event) = events.recv().await {
        if let Ok(line) = serde_json::to_string(&event) {
          println!("{line}");
        }
      }
    });
  }

  let mut waiter = {
    let handle = handle.clone();
    tokio::spawn(async move { handle.wait().await })
  };

  tokio::select! {
    result = &mut waiter => result??,
    _ = tokio::signal::ctrl_c() => {
      eprintln!("stopping; press Ctrl-C again to force");
      handle.stop().await;
      tokio::select! {
        result = &mut waiter => result??,
        _ = tokio::signal::ctrl_c() => {
          eprintln!("forcing shutdown");
          handle.force_stop().await;
          waiter.await??;
        }
      }
    }
  }

  println!("{}", serde_json::to_string_pretty(&handle.status())?);
  Ok(())
}

async fn run_request(workflow_file: PathBuf, redis_url: Option<String>) -> Result<()> {
  let engine = engine_for(&redis_url).await?;
  let (workflow_id, def) = load_def(&workflow_file).await?;
  let payload = read_payload_from_stdin()?;

  let prepared = engine.load(&workflow_id, &def)?;
  let output = engine.execute(&prepared, payload).await?;
  engine.shutdown(false).await;

  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

async fn run_node(workflow_file: PathBuf, node: String, redis_url: Option<String>) -> Result<()> {
  let engine = engine_for(&redis_url).await?;
  let (workflow_id, def) = load_def(&workflow_file).await?;
  let payload = read_payload_from_stdin()?;

  let prepared = engine.load(&workflow_id, &def)?;
  let output = engine.execute_node(&prepared, &node, payload).await?;
  engine.shutdown(false).await;

  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

async fn run_worker(redis_url: Option<String>) -> Result<()> {
  let broker = broker_for(&redis_url).await?;
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);

  run_worker_loop(
    &registry,
    BufReader::new(tokio::io::stdin()),
    tokio::io::stdout(),
  )
  .await
  .context("worker loop failed")
}
