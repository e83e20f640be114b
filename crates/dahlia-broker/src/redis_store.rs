//! Redis-backed stores.
//!
//! Non-blocking commands share one multiplexed [`ConnectionManager`].
//! Blocking pops and subscriptions each take a dedicated connection - a
//! blocking command would stall every other caller of the multiplexed one.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use tracing::warn;

use crate::{BrokerError, CacheStore, PubSubStore, QueueStore, Subscription, cache_key, queue_key};

/// All three stores over one Redis deployment.
pub struct RedisBroker {
  client: Client,
  manager: ConnectionManager,
}

impl RedisBroker {
  /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
  pub async fn connect(url: &str) -> Result<Self, BrokerError> {
    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client.clone()).await?;
    Ok(Self { client, manager })
  }
}

#[async_trait]
impl QueueStore for RedisBroker {
  async fn push(&self, queue: &str, value: &Value) -> Result<(), BrokerError> {
    let payload = serde_json::to_string(value)?;
    let mut conn = self.manager.clone();
    conn.lpush::<_, _, ()>(queue_key(queue), payload).await?;
    Ok(())
  }

  async fn pop(&self, queue: &str, timeout: Option<Duration>) -> Result<Option<Value>, BrokerError> {
    // BRPOP with timeout 0 blocks indefinitely; a dedicated connection keeps
    // the block away from the shared manager.
    let mut conn = self.client.get_multiplexed_async_connection().await?;
    let seconds = timeout.map(|t| t.as_secs_f64()).unwrap_or(0.0);
    let reply: Option<(String, String)> = conn.brpop(queue_key(queue), seconds).await?;
    match reply {
      Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
      None => Ok(None),
    }
  }

  async fn length(&self, queue: &str) -> Result<usize, BrokerError> {
    let mut conn = self.manager.clone();
    Ok(conn.llen(queue_key(queue)).await?)
  }
}

#[async_trait]
impl CacheStore for RedisBroker {
  async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), BrokerError> {
    let payload = serde_json::to_string(value)?;
    let mut conn = self.manager.clone();
    match ttl {
      Some(ttl) => {
        conn
          .set_ex::<_, _, ()>(cache_key(key), payload, ttl.as_secs().max(1))
          .await?;
      }
      None => conn.set::<_, _, ()>(cache_key(key), payload).await?,
    }
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<Value>, BrokerError> {
    let mut conn = self.manager.clone();
    let payload: Option<String> = conn.get(cache_key(key)).await?;
    match payload {
      Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
      None => Ok(None),
    }
  }

  async fn delete(&self, key: &str) -> Result<(), BrokerError> {
    let mut conn = self.manager.clone();
    conn.del::<_, ()>(cache_key(key)).await?;
    Ok(())
  }

  async fn exists(&self, key: &str) -> Result<bool, BrokerError> {
    let mut conn = self.manager.clone();
    Ok(conn.exists(cache_key(key)).await?)
  }
}

struct RedisSubscription {
  channel: String,
  stream: Pin<Box<dyn Stream<Item = redis::Msg> + Send>>,
}

#[async_trait]
impl Subscription for RedisSubscription {
  async fn next(&mut self) -> Option<Value> {
    loop {
      let msg = self.stream.next().await?;
      let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
          warn!(channel = %self.channel, error = %e, "discarding non-text pub/sub payload");
          continue;
        }
      };
      match serde_json::from_str(&payload) {
        Ok(value) => return Some(value),
        Err(e) => {
          warn!(channel = %self.channel, error = %e, "discarding malformed pub/sub payload");
        }
      }
    }
  }
}

#[async_trait]
impl PubSubStore for RedisBroker {
  async fn publish(&self, channel: &str, value: &Value) -> Result<usize, BrokerError> {
    let payload = serde_json::to_string(value)?;
    let mut conn = self.manager.clone();
    let receivers: i64 = conn.publish(channel, payload).await?;
    Ok(receivers.max(0) as usize)
  }

  async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError> {
    let mut pubsub = self.client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(Box::new(RedisSubscription {
      channel: channel.to_string(),
      stream: Box::pin(pubsub.into_on_message()),
    }))
  }
}
