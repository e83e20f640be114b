//! Dahlia Broker
//!
//! The cross-loop messaging substrate: durable FIFO queues, a TTL'd KV cache
//! and a transient pub/sub channel, each behind a trait with a Redis backend
//! for production and an in-memory backend for tests and single-process runs.
//!
//! Delivery semantics: queues are at-least-once FIFO with each element handed
//! to at most one consumer; pub/sub is publish-and-forget - messages published
//! with zero subscribers are lost. Values are JSON throughout, and keys on the
//! backing store are namespaced `queue:<name>` / `cache:<key>`.

mod memory;
mod redis_store;

pub use memory::MemoryBroker;
pub use redis_store::RedisBroker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by the backing stores.
#[derive(Debug, Error)]
pub enum BrokerError {
  #[error("redis error: {0}")]
  Redis(#[from] ::redis::RedisError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("subscription to '{channel}' is closed")]
  SubscriptionClosed { channel: String },
}

/// Durable FIFO queues.
#[async_trait]
pub trait QueueStore: Send + Sync {
  /// JSON-serialize and left-push a value.
  async fn push(&self, queue: &str, value: &Value) -> Result<(), BrokerError>;

  /// Blocking right-pop. `None` on timeout; no timeout blocks until a
  /// message arrives.
  async fn pop(&self, queue: &str, timeout: Option<Duration>) -> Result<Option<Value>, BrokerError>;

  async fn length(&self, queue: &str) -> Result<usize, BrokerError>;
}

/// TTL'd key/value cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
  async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), BrokerError>;

  async fn get(&self, key: &str) -> Result<Option<Value>, BrokerError>;

  async fn delete(&self, key: &str) -> Result<(), BrokerError>;

  async fn exists(&self, key: &str) -> Result<bool, BrokerError>;
}

/// A live pub/sub subscription. Requires a connection dedicated to it.
#[async_trait]
pub trait Subscription: Send {
  /// Next published value; `None` once the channel is gone.
  async fn next(&mut self) -> Option<Value>;
}

/// Transient fan-out channels.
#[async_trait]
pub trait PubSubStore: Send + Sync {
  /// Publish a value, returning the number of current subscribers.
  async fn publish(&self, channel: &str, value: &Value) -> Result<usize, BrokerError>;

  async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// The three stores bundled for injection into the engine and nodes.
#[derive(Clone)]
pub struct Broker {
  pub queues: Arc<dyn QueueStore>,
  pub cache: Arc<dyn CacheStore>,
  pub pubsub: Arc<dyn PubSubStore>,
}

impl Broker {
  /// An in-memory broker; all three stores share one keyspace.
  pub fn in_memory() -> Self {
    let store = Arc::new(MemoryBroker::new());
    Self {
      queues: store.clone(),
      cache: store.clone(),
      pubsub: store,
    }
  }

  /// A Redis-backed broker.
  pub async fn redis(url: &str) -> Result<Self, BrokerError> {
    let store = Arc::new(RedisBroker::connect(url).await?);
    Ok(Self {
      queues: store.clone(),
      cache: store.clone(),
      pubsub: store,
    })
  }
}

impl std::fmt::Debug for Broker {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("Broker")
  }
}

pub(crate) fn queue_key(name: &str) -> String {
  format!("queue:{name}")
}

pub(crate) fn cache_key(name: &str) -> String {
  format!("cache:{name}")
}
