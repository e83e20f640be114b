//! In-memory stores for tests and single-process runs.
//!
//! Semantics match the Redis backend: FIFO queues with blocking pops,
//! TTL'd cache entries, transient broadcast channels. None of the locks are
//! held across a suspension point.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;

use crate::{BrokerError, CacheStore, PubSubStore, QueueStore, Subscription, cache_key, queue_key};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct QueueSlot {
  items: VecDeque<Value>,
  notify: Arc<Notify>,
}

struct CacheEntry {
  value: Value,
  expires_at: Option<Instant>,
}

impl CacheEntry {
  fn expired(&self) -> bool {
    self.expires_at.is_some_and(|at| Instant::now() >= at)
  }
}

/// One shared keyspace implementing all three store traits.
#[derive(Default)]
pub struct MemoryBroker {
  queues: Mutex<HashMap<String, QueueSlot>>,
  cache: Mutex<HashMap<String, CacheEntry>>,
  channels: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl MemoryBroker {
  pub fn new() -> Self {
    Self::default()
  }

  fn try_pop(&self, key: &str) -> (Option<Value>, Arc<Notify>) {
    let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
    let slot = queues.entry(key.to_string()).or_default();
    (slot.items.pop_front(), slot.notify.clone())
  }
}

#[async_trait]
impl QueueStore for MemoryBroker {
  async fn push(&self, queue: &str, value: &Value) -> Result<(), BrokerError> {
    let key = queue_key(queue);
    let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
    let slot = queues.entry(key).or_default();
    slot.items.push_back(value.clone());
    slot.notify.notify_one();
    Ok(())
  }

  async fn pop(&self, queue: &str, timeout: Option<Duration>) -> Result<Option<Value>, BrokerError> {
    let key = queue_key(queue);
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
      let (value, notify) = self.try_pop(&key);
      if let Some(value) = value {
        return Ok(Some(value));
      }

      // The permit model of Notify covers the gap between releasing the
      // lock and awaiting: a push in between leaves a stored permit.
      let notified = notify.notified();
      match deadline {
        Some(deadline) => {
          if tokio::time::timeout_at(deadline, notified).await.is_err() {
            return Ok(None);
          }
        }
        None => notified.await,
      }
    }
  }

  async fn length(&self, queue: &str) -> Result<usize, BrokerError> {
    let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(queues.get(&queue_key(queue)).map_or(0, |slot| slot.items.len()))
  }
}

#[async_trait]
impl CacheStore for MemoryBroker {
  async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), BrokerError> {
    let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
    cache.insert(
      cache_key(key),
      CacheEntry {
        value: value.clone(),
        expires_at: ttl.map(|t| Instant::now() + t),
      },
    );
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<Value>, BrokerError> {
    let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
    let key = cache_key(key);
    if cache.get(&key).is_some_and(CacheEntry::expired) {
      cache.remove(&key);
      return Ok(None);
    }
    Ok(cache.get(&key).map(|entry| entry.value.clone()))
  }

  async fn delete(&self, key: &str) -> Result<(), BrokerError> {
    let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
    cache.remove(&cache_key(key));
    Ok(())
  }

  async fn exists(&self, key: &str) -> Result<bool, BrokerError> {
    Ok(self.get(key).await?.is_some())
  }
}

struct MemorySubscription {
  receiver: broadcast::Receiver<Value>,
}

#[async_trait]
impl Subscription for MemorySubscription {
  async fn next(&mut self) -> Option<Value> {
    loop {
      match self.receiver.recv().await {
        Ok(value) => return Some(value),
        Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }
}

#[async_trait]
impl PubSubStore for MemoryBroker {
  async fn publish(&self, channel: &str, value: &Value) -> Result<usize, BrokerError> {
    let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(sender) = channels.get(channel) else {
      return Ok(0);
    };
    let subscribers = sender.receiver_count();
    if subscribers == 0 {
      return Ok(0);
    }
    // Send can only fail with zero receivers, which we just excluded.
    let _ = sender.send(value.clone());
    Ok(subscribers)
  }

  async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError> {
    let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
    let sender = channels
      .entry(channel.to_string())
      .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
    Ok(Box::new(MemorySubscription {
      receiver: sender.subscribe(),
    }))
  }
}
