use std::sync::Arc;

use async_trait::async_trait;
use dahlia_broker::{PubSubStore, Subscription};
use dahlia_node::{Node, NodeConfig, NodeError, NodeOutput, NodeVariant, RunState};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::info;

/// Pub/sub channel carrying deliveries for a webhook id.
pub fn webhook_channel(webhook_id: &str) -> String {
  format!("webhook:{webhook_id}")
}

/// Producer fed by an external webhook endpoint.
///
/// The HTTP surface publishes `{ body, headers, method, query_params }` to
/// `webhook:<webhook_id>`; this producer subscribes and yields one output per
/// delivery. A closed channel drains the loop by emitting a completion
/// sentinel.
pub struct WebhookTrigger {
  config: NodeConfig,
  state: RunState,
  pubsub: Arc<dyn PubSubStore>,
  subscription: Mutex<Option<Box<dyn Subscription>>>,
}

impl WebhookTrigger {
  pub fn new(config: NodeConfig, pubsub: Arc<dyn PubSubStore>) -> Self {
    Self {
      config,
      state: RunState::new(),
      pubsub,
      subscription: Mutex::new(None),
    }
  }

  fn webhook_id(&self) -> Result<&str, NodeError> {
    self.config.form_str("webhook_id").ok_or_else(|| {
      NodeError::execution(&self.config.id, "webhook_id is not configured")
    })
  }
}

#[async_trait]
impl Node for WebhookTrigger {
  fn identifier(&self) -> &str {
    "webhook-trigger"
  }

  fn config(&self) -> &NodeConfig {
    &self.config
  }

  fn state(&self) -> &RunState {
    &self.state
  }

  fn variant(&self) -> NodeVariant {
    NodeVariant::Producer
  }

  fn required_fields(&self) -> &[&str] {
    &["webhook_id"]
  }

  async fn setup(&self) -> Result<(), NodeError> {
    let channel = webhook_channel(self.webhook_id()?);
    let subscription = self
      .pubsub
      .subscribe(&channel)
      .await
      .map_err(|e| NodeError::transport(&self.config.id, e.to_string()))?;
    *self.subscription.lock().await = Some(subscription);
    info!(node_id = %self.config.id, channel = %channel, "webhook subscribed");
    Ok(())
  }

  async fn cleanup(&self, _input: Option<&NodeOutput>) -> Result<(), NodeError> {
    self.subscription.lock().await.take();
    Ok(())
  }

  async fn execute(
    &self,
    _form: Map<String, Value>,
    mut input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    let webhook_id = self.webhook_id()?.to_string();

    // A worker process runs setup per dispatch; guard the cooperative path
    // against a missing subscription as well.
    if self.subscription.lock().await.is_none() {
      self.setup().await?;
    }

    let mut guard = self.subscription.lock().await;
    let subscription = guard
      .as_mut()
      .ok_or_else(|| NodeError::transport(&self.config.id, "subscription unavailable"))?;

    let Some(payload) = subscription.next().await else {
      // Channel gone; drain the loop.
      return Ok(NodeOutput::completion(&self.config.id));
    };

    let iteration = self.state.execution_count() + 1;
    let key = self.unique_output_key(&input, "webhook");
    input.data.insert(
      key,
      json!({
        "webhook_id": webhook_id,
        "data": payload,
      }),
    );
    input.note_provenance(&self.config.id, "webhook", iteration);
    input.id = self.config.id.clone();
    Ok(input)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use dahlia_broker::Broker;

  fn webhook_node(broker: &Broker) -> WebhookTrigger {
    let mut form = Map::new();
    form.insert("webhook_id".to_string(), json!("hook1"));
    WebhookTrigger::new(
      NodeConfig::new("hook", "webhook-trigger").with_form(form),
      broker.pubsub.clone(),
    )
  }

  #[tokio::test]
  async fn emits_published_payloads() {
    let broker = Broker::in_memory();
    let node = webhook_node(&broker);
    node.initialize().await.unwrap();

    broker
      .pubsub
      .publish(
        "webhook:hook1",
        &json!({ "body": { "user": "a" }, "headers": {}, "method": "POST", "query_params": {} }),
      )
      .await
      .unwrap();

    let out = node.run(NodeOutput::new("hook")).await.unwrap();
    assert_eq!(out.data["webhook"]["webhook_id"], json!("hook1"));
    assert_eq!(out.data["webhook"]["data"]["body"]["user"], json!("a"));
    assert_eq!(out.metadata["operation"], json!("webhook"));
  }

  #[tokio::test]
  async fn missing_webhook_id_fails_readiness() {
    let broker = Broker::in_memory();
    let node = WebhookTrigger::new(
      NodeConfig::new("hook", "webhook-trigger"),
      broker.pubsub.clone(),
    );
    assert!(!node.is_ready().is_ok());
    assert!(node.initialize().await.is_err());
  }
}
