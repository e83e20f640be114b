//! End-to-end engine tests: loading, validation, routing, cross-loop queues,
//! sentinel drains and single-node development mode.

mod support;

use std::sync::Arc;
use std::time::Duration;

use dahlia_broker::Broker;
use dahlia_engine::{Engine, EngineConfig};
use dahlia_events::{ExecutionEvent, WorkflowStatus};
use dahlia_node::{NodeOutput, NodeRegistry};
use dahlia_nodes::register_defaults;
use dahlia_pool::PoolConfig;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use support::*;

fn engine_with(registry: NodeRegistry, broker: Broker) -> Engine {
  Engine::with_config(
    Arc::new(registry),
    broker,
    EngineConfig {
      pools: PoolConfig::default(),
      error_backoff: Duration::from_millis(10),
    },
  )
}

fn summarize(event: &ExecutionEvent) -> String {
  match event {
    ExecutionEvent::WorkflowStarted { .. } => "workflow_started".to_string(),
    ExecutionEvent::WorkflowCompleted { .. } => "workflow_completed".to_string(),
    ExecutionEvent::WorkflowFailed { error, .. } => format!("workflow_failed:{error}"),
    ExecutionEvent::NodeStarted { node_id, .. } => format!("started:{node_id}"),
    ExecutionEvent::NodeCompleted { node_id, route, .. } => {
      format!("completed:{node_id}:{route}")
    }
    ExecutionEvent::NodeFailed { node_id, .. } => format!("failed:{node_id}"),
  }
}

fn drain_events(events: &mut UnboundedReceiver<ExecutionEvent>) -> Vec<String> {
  let mut seen = Vec::new();
  while let Ok(event) = events.try_recv() {
    seen.push(summarize(&event));
  }
  seen
}

/// Scenario: conditional routing. `P → C →yes A →default Z`, `C →no B
/// →default Z`. The first payload takes `yes`, the second takes `no`; the
/// untaken branch never executes, and events stay in iteration order.
#[tokio::test]
async fn conditional_routing_follows_exactly_one_branch() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  let log = new_log();
  register_sequence(&mut registry, vec![json!(5), json!(1)]);
  register_recorders(&mut registry, &log);

  let workflow = def(json!({
    "nodes": [
      { "id": "p", "type": "sequence" },
      { "id": "c", "type": "condition", "data": condition_form("greater_than", "3") },
      { "id": "a", "type": "recorder" },
      { "id": "b", "type": "recorder" },
      { "id": "z", "type": "recorder" }
    ],
    "edges": [
      { "source": "p", "target": "c", "sourceHandle": null },
      { "source": "c", "target": "a", "sourceHandle": "yes" },
      { "source": "c", "target": "b", "sourceHandle": "no" },
      { "source": "a", "target": "z" },
      { "source": "b", "target": "z" }
    ]
  }));

  let engine = engine_with(registry, broker);
  let prepared = engine.load("wf-routing", &workflow).unwrap();
  let handle = engine.start(&prepared).await.unwrap();
  let mut events = handle.events().unwrap();
  handle.wait().await.unwrap();

  assert_eq!(
    drain_events(&mut events),
    vec![
      "workflow_started",
      "started:p",
      "completed:p:default",
      "started:c",
      "completed:c:yes",
      "started:a",
      "completed:a:default",
      "started:z",
      "completed:z:default",
      "started:p",
      "completed:p:default",
      "started:c",
      "completed:c:no",
      "started:b",
      "completed:b:default",
      "started:z",
      "completed:z:default",
      "started:p",
      "completed:p:default",
      "workflow_completed",
    ]
  );

  // The untaken branch never ran, and the sentinel cascade cleaned every
  // reachable node exactly once.
  assert_eq!(
    entries(&log),
    vec![
      "run:a:5",
      "run:z:5",
      "run:b:1",
      "run:z:1",
      "cleanup:a",
      "cleanup:b",
      "cleanup:z",
    ]
  );

  assert_eq!(handle.status().status, WorkflowStatus::Completed);
}

/// Scenarios: cross-loop queues and sentinel drain. Loop one pushes three
/// payloads through a queue writer and ends; its drain forwards a sentinel
/// that loop two pops, cascades and exits on, status `completed`.
#[tokio::test]
async fn queues_carry_payloads_across_loops_and_drain_on_sentinel() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  let log = new_log();
  register_sequence(&mut registry, vec![json!(1), json!(2), json!(3)]);
  register_recorders(&mut registry, &log);

  let producer_side = def(json!({
    "nodes": [
      { "id": "p1", "type": "sequence" },
      { "id": "w", "type": "queue-writer", "data": { "form": { "queue": "q" } } }
    ],
    "edges": [ { "source": "p1", "target": "w" } ]
  }));
  let consumer_side = def(json!({
    "nodes": [
      { "id": "r", "type": "queue-reader", "data": { "form": { "queue": "q" } } },
      { "id": "f", "type": "finisher" }
    ],
    "edges": [ { "source": "r", "target": "f" } ]
  }));

  let engine = engine_with(registry, broker.clone());
  let consumer = engine.start(&engine.load("wf-consumer", &consumer_side).unwrap()).await.unwrap();
  let producer = engine.start(&engine.load("wf-producer", &producer_side).unwrap()).await.unwrap();

  producer.wait().await.unwrap();
  consumer.wait().await.unwrap();

  let seen: Vec<String> = entries(&log)
    .into_iter()
    .filter(|entry| entry.starts_with("run:f:"))
    .collect();
  assert_eq!(seen, vec!["run:f:1", "run:f:2", "run:f:3"]);
  assert!(entries(&log).contains(&"cleanup:f".to_string()));

  assert_eq!(producer.status().status, WorkflowStatus::Completed);
  assert_eq!(consumer.status().status, WorkflowStatus::Completed);
  assert_eq!(broker.queues.length("q").await.unwrap(), 0);
}

/// Scenario: drain on shutdown. Stopping the producer loop lets the current
/// iteration finish, then its queue writer forwards a sentinel so the
/// consumer loop drains instead of blocking forever.
#[tokio::test]
async fn soft_shutdown_drains_downstream_loops_through_the_queue() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  let log = new_log();
  register_recorders(&mut registry, &log);

  let producer_side = def(json!({
    "nodes": [
      { "id": "tick", "type": "interval-trigger", "data": { "form": { "interval_ms": 20 } } },
      { "id": "w", "type": "queue-writer", "data": { "form": { "queue": "q2" } } }
    ],
    "edges": [ { "source": "tick", "target": "w" } ]
  }));
  let consumer_side = def(json!({
    "nodes": [
      { "id": "r", "type": "queue-reader", "data": { "form": { "queue": "q2" } } },
      { "id": "f", "type": "finisher" }
    ],
    "edges": [ { "source": "r", "target": "f" } ]
  }));

  let engine = engine_with(registry, broker.clone());
  let consumer = engine.start(&engine.load("wf-c", &consumer_side).unwrap()).await.unwrap();
  let producer = engine.start(&engine.load("wf-p", &producer_side).unwrap()).await.unwrap();

  tokio::time::sleep(Duration::from_millis(100)).await;
  producer.stop().await;
  producer.wait().await.unwrap();

  // The sentinel forwarded by the writer's cleanup drains the consumer.
  consumer.wait().await.unwrap();
  assert_eq!(consumer.status().status, WorkflowStatus::Completed);
  assert!(entries(&log).contains(&"cleanup:f".to_string()));
  assert_eq!(broker.queues.length("q2").await.unwrap(), 0);
}

/// Scenario: webhook producer. An external publish lands in the producer's
/// channel, templates render against the delivered payload, and downstream
/// nodes see the extracted value.
#[tokio::test]
async fn webhook_deliveries_flow_through_templates() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  let log = new_log();
  register_recorders(&mut registry, &log);

  let workflow = def(json!({
    "nodes": [
      { "id": "hook", "type": "webhook-trigger", "data": { "form": { "webhook_id": "hook1" } } },
      {
        "id": "extract",
        "type": "set-fields",
        "data": { "form": { "fields": { "x": "{{ data.webhook.data.body.user }}" } } }
      },
      { "id": "f", "type": "finisher" }
    ],
    "edges": [
      { "source": "hook", "target": "extract" },
      { "source": "extract", "target": "f" }
    ]
  }));

  let engine = engine_with(registry, broker.clone());
  let handle = engine.start(&engine.load("wf-hook", &workflow).unwrap()).await.unwrap();

  let subscribers = broker
    .pubsub
    .publish(
      "webhook:hook1",
      &json!({ "body": { "user": "a" }, "headers": {}, "method": "POST", "query_params": {} }),
    )
    .await
    .unwrap();
  assert_eq!(subscribers, 1);

  tokio::time::sleep(Duration::from_millis(100)).await;
  handle.force_stop().await;
  handle.wait().await.unwrap();

  assert!(entries(&log).contains(&"run:f:\"a\"".to_string()));
}

/// A failed node abandons the iteration, emits `node_failed`, and the loop
/// continues with the next payload after the backoff.
#[tokio::test]
async fn failed_iterations_back_off_and_continue() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  register_sequence(&mut registry, vec![json!(1), json!(2)]);
  register_always_fails(&mut registry);

  let workflow = def(json!({
    "nodes": [
      { "id": "p", "type": "sequence" },
      { "id": "bad", "type": "always-fails" }
    ],
    "edges": [ { "source": "p", "target": "bad" } ]
  }));

  let engine = engine_with(registry, broker);
  let handle = engine.start(&engine.load("wf-err", &workflow).unwrap()).await.unwrap();
  let mut events = handle.events().unwrap();
  handle.wait().await.unwrap();

  let seen = drain_events(&mut events);
  let failures = seen.iter().filter(|entry| *entry == "failed:bad").count();
  assert_eq!(failures, 2);

  // The loop still drained cleanly after both failures.
  assert_eq!(*seen.last().unwrap(), "workflow_completed");
  let status = handle.status();
  assert_eq!(status.status, WorkflowStatus::Completed);
  assert_eq!(
    status.last_errors.get("bad").map(String::as_str),
    Some("execution failed for node 'bad': intentional failure")
  );
}

/// The scheduler must not descend past a non-blocking node in the same
/// iteration; the node after it only sees the cleanup cascade.
#[tokio::test]
async fn scheduler_does_not_descend_past_non_blocking_nodes() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  let log = new_log();
  register_sequence(&mut registry, vec![json!(1)]);
  register_recorders(&mut registry, &log);

  let workflow = def(json!({
    "nodes": [
      { "id": "p", "type": "sequence" },
      { "id": "nb", "type": "finisher" },
      { "id": "after", "type": "recorder" }
    ],
    "edges": [
      { "source": "p", "target": "nb" },
      { "source": "nb", "target": "after" }
    ]
  }));

  let engine = engine_with(registry, broker);
  let handle = engine.start(&engine.load("wf-nb", &workflow).unwrap()).await.unwrap();
  handle.wait().await.unwrap();

  let seen = entries(&log);
  assert!(seen.contains(&"run:nb:1".to_string()));
  assert!(!seen.iter().any(|entry| entry.starts_with("run:after")));
  // The drain still reaches it for cleanup.
  assert!(seen.contains(&"cleanup:after".to_string()));
}

/// API mode: one-shot walk from the entry node, stopping at the respond
/// node; nodes wired after it never run.
#[tokio::test]
async fn api_walk_stops_at_the_respond_node() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  let log = new_log();
  register_recorders(&mut registry, &log);

  let workflow = def(json!({
    "nodes": [
      {
        "id": "greet",
        "type": "set-fields",
        "data": { "form": { "fields": { "greeting": "hi {{ data.name }}" } } }
      },
      { "id": "reply", "type": "respond", "data": { "form": { "body": "{{ data.greeting }}" } } },
      { "id": "after", "type": "recorder" }
    ],
    "edges": [
      { "source": "greet", "target": "reply" },
      { "source": "reply", "target": "after" }
    ]
  }));

  let engine = engine_with(registry, broker);
  let prepared = engine.load("wf-api", &workflow).unwrap();
  assert_eq!(prepared.kind, dahlia_config::WorkflowKind::Api);

  let output = engine
    .execute(&prepared, Some(json!({ "name": "ada" })))
    .await
    .unwrap();

  assert!(output.signals_response());
  assert_eq!(output.data["response"], json!("hi ada"));
  assert!(entries(&log).is_empty());
}

/// Scenario: single-node development mode. The node under test reads its
/// immediate predecessor's output from the cache and writes its own back.
#[tokio::test]
async fn single_node_dev_mode_resolves_upstream_from_cache() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  let log = new_log();
  register_recorders(&mut registry, &log);

  let workflow = def(json!({
    "nodes": [
      { "id": "a", "type": "recorder" },
      { "id": "b", "type": "recorder" },
      { "id": "c", "type": "recorder" }
    ],
    "edges": [
      { "source": "a", "target": "b" },
      { "source": "b", "target": "c" }
    ]
  }));

  broker.cache.set("a_output", &json!({ "x": 1 }), None).await.unwrap();
  broker.cache.set("b_output", &json!({ "y": 2 }), None).await.unwrap();

  let engine = engine_with(registry, broker.clone());
  let prepared = engine.load("wf-dev", &workflow).unwrap();
  let output = engine.execute_node(&prepared, "c", None).await.unwrap();

  // Only the immediate predecessor's output is materialized.
  assert_eq!(output.data["y"], json!(2));
  assert!(!output.data.contains_key("x"));

  let cached = broker.cache.get("c_output").await.unwrap().unwrap();
  let cached = NodeOutput::from_value(cached).unwrap();
  assert_eq!(cached.data["y"], json!(2));
}

/// The queue namer assigns `queue_<from>_<to>` to writer → reader edges in
/// both endpoints' wiring configs, without overwriting explicit names.
#[tokio::test]
async fn queue_namer_assigns_canonical_channel_names() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  register_sequence(&mut registry, vec![]);

  let workflow = def(json!({
    "nodes": [
      { "id": "p", "type": "sequence" },
      { "id": "w", "type": "queue-writer" },
      { "id": "r", "type": "queue-reader" },
      { "id": "w2", "type": "queue-writer", "data": { "config": { "queue_name": "explicit" } } },
      { "id": "r2", "type": "queue-reader" }
    ],
    "edges": [
      { "source": "p", "target": "w" },
      { "source": "w", "target": "r" },
      { "source": "p", "target": "w2" },
      { "source": "w2", "target": "r2" }
    ]
  }));

  let engine = engine_with(registry, broker);
  let prepared = engine.load("wf-naming", &workflow).unwrap();

  let wiring = |id: &str| {
    prepared
      .graph
      .lookup(id)
      .unwrap()
      .instance()
      .config()
      .wiring_get("queue_name")
  };

  assert_eq!(wiring("w"), Some(json!("queue_w_r")));
  assert_eq!(wiring("r"), Some(json!("queue_w_r")));
  // Explicit names survive; the reader still gets the canonical pair name.
  assert_eq!(wiring("w2"), Some(json!("explicit")));
  assert_eq!(wiring("r2"), Some(json!("queue_w2_r2")));
}

#[tokio::test]
async fn empty_workflows_are_rejected() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);

  let engine = engine_with(registry, broker);
  let err = engine
    .load("wf-empty", &def(json!({ "nodes": [], "edges": [] })))
    .unwrap_err();
  assert!(err.to_string().contains("no nodes"));
}

#[tokio::test]
async fn mode_rules_reject_mismatched_graphs() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  let log = new_log();
  register_sequence(&mut registry, vec![]);
  register_recorders(&mut registry, &log);
  let engine = engine_with(registry, broker);

  // API workflows cannot contain producers.
  let err = engine
    .load(
      "wf-bad-api",
      &def(json!({
        "workflow_type": "api",
        "nodes": [ { "id": "p", "type": "sequence" } ],
        "edges": []
      })),
    )
    .unwrap_err();
  assert!(err.to_string().contains("cannot contain producers"));

  // Production needs a producer.
  let err = engine
    .load(
      "wf-bad-prod",
      &def(json!({
        "workflow_type": "production",
        "nodes": [ { "id": "t", "type": "recorder" } ],
        "edges": []
      })),
    )
    .unwrap_err();
  assert!(err.to_string().contains("at least one producer"));

  // Production cannot contain respond nodes.
  let err = engine
    .load(
      "wf-prod-respond",
      &def(json!({
        "nodes": [
          { "id": "p", "type": "sequence" },
          { "id": "reply", "type": "respond" }
        ],
        "edges": [ { "source": "p", "target": "reply" } ]
      })),
    )
    .unwrap_err();
  assert!(err.to_string().contains("response node 'reply'"));
}

#[tokio::test]
async fn readiness_failures_are_aggregated_into_one_report() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  let log = new_log();
  register_recorders(&mut registry, &log);

  let workflow = def(json!({
    "nodes": [
      { "id": "e", "type": "recorder" },
      { "id": "check", "type": "condition" }
    ],
    "edges": [ { "source": "e", "target": "check" } ]
  }));

  let engine = engine_with(registry, broker);
  let err = engine.load("wf-unready", &workflow).unwrap_err();
  let report = err.to_string();
  assert!(report.contains("check: field: missing required field"));
  assert!(report.contains("check: operator: missing required field"));
}

/// Single-node mode: one invocation, output returned directly.
#[tokio::test]
async fn single_node_workflows_execute_their_one_node() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  let log = new_log();
  register_recorders(&mut registry, &log);

  let workflow = def(json!({
    "nodes": [ { "id": "only", "type": "recorder" } ],
    "edges": []
  }));

  let engine = engine_with(registry, broker);
  let prepared = engine.load("wf-single", &workflow).unwrap();
  assert_eq!(prepared.kind, dahlia_config::WorkflowKind::SingleNode);

  let output = engine.execute(&prepared, Some(json!({ "x": 7 }))).await.unwrap();
  assert_eq!(output.data["x"], json!(7));
  assert_eq!(entries(&log), vec!["run:only:7"]);
}

#[tokio::test]
async fn production_workflows_do_not_run_via_execute() {
  let broker = Broker::in_memory();
  let mut registry = NodeRegistry::new();
  register_defaults(&mut registry, &broker);
  register_sequence(&mut registry, vec![]);

  let workflow = def(json!({
    "nodes": [ { "id": "p", "type": "sequence" } ],
    "edges": []
  }));

  let engine = engine_with(registry, broker);
  let prepared = engine.load("wf-prod", &workflow).unwrap();
  let err = engine.execute(&prepared, None).await.unwrap_err();
  assert!(err.to_string().contains("via start"));
}
