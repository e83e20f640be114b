//! Dahlia Nodes
//!
//! The built-in node catalog: producers (interval and webhook triggers, queue
//! reader), the queue writer that carries payloads across loop boundaries,
//! the conditional router, the HTTP client node, and small utility nodes
//! (set-fields, delay, respond).
//!
//! [`register_defaults`] wires the catalog into a registry; node types that
//! talk to the messaging substrate capture their store handles at
//! registration time, so instances never reach for globals.

mod condition;
mod delay;
mod http_request;
mod interval;
mod operators;
mod queue_reader;
mod queue_writer;
mod respond;
mod set_fields;
mod webhook;

pub use condition::Condition;
pub use delay::Delay;
pub use http_request::HttpRequest;
pub use interval::IntervalTrigger;
pub use operators::OperatorRegistry;
pub use queue_reader::QueueReader;
pub use queue_writer::QueueWriter;
pub use respond::Respond;
pub use set_fields::SetFields;
pub use webhook::{WebhookTrigger, webhook_channel};

use std::sync::Arc;

use dahlia_broker::Broker;
use dahlia_node::{Node, NodeDescriptor, NodeRegistry, NodeVariant};

pub use dahlia_node::QUEUE_NAME_KEY;

/// Register every built-in node type.
pub fn register_defaults(registry: &mut NodeRegistry, broker: &Broker) {
  registry.register(
    NodeDescriptor::new("interval-trigger", NodeVariant::Producer),
    |config| Ok(Arc::new(IntervalTrigger::new(config)) as Arc<dyn Node>),
  );

  let pubsub = broker.pubsub.clone();
  registry.register(
    NodeDescriptor::new("webhook-trigger", NodeVariant::Producer),
    move |config| Ok(Arc::new(WebhookTrigger::new(config, pubsub.clone())) as Arc<dyn Node>),
  );

  let queues = broker.queues.clone();
  registry.register(
    NodeDescriptor::new("queue-reader", NodeVariant::Producer),
    move |config| Ok(Arc::new(QueueReader::new(config, queues.clone())) as Arc<dyn Node>),
  );

  let queues = broker.queues.clone();
  registry.register(
    NodeDescriptor::new("queue-writer", NodeVariant::Blocking),
    move |config| Ok(Arc::new(QueueWriter::new(config, queues.clone())) as Arc<dyn Node>),
  );

  let operators = Arc::new(OperatorRegistry::with_defaults());
  registry.register(
    NodeDescriptor::new("condition", NodeVariant::Conditional),
    move |config| Ok(Arc::new(Condition::new(config, operators.clone())) as Arc<dyn Node>),
  );

  registry.register(
    NodeDescriptor::new("set-fields", NodeVariant::Blocking),
    |config| Ok(Arc::new(SetFields::new(config)) as Arc<dyn Node>),
  );

  registry.register(
    NodeDescriptor::new("http-request", NodeVariant::Blocking),
    |config| Ok(Arc::new(HttpRequest::new(config)) as Arc<dyn Node>),
  );

  registry.register(NodeDescriptor::new("delay", NodeVariant::Blocking), |config| {
    Ok(Arc::new(Delay::new(config)) as Arc<dyn Node>)
  });

  registry.register(NodeDescriptor::new("respond", NodeVariant::Blocking), |config| {
    Ok(Arc::new(Respond::new(config)) as Arc<dyn Node>)
  });
}
