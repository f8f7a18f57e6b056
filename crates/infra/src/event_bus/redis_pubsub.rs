//! Redis pub/sub-backed bus.
//!
//! Redis pub/sub is not durable: subscribers that are offline miss
//! messages. That matches the change notification contract (future updates
//! only, no replay); the aggregate itself is always re-readable.

use std::marker::PhantomData;
use std::sync::mpsc;
use std::thread;

use redis::Commands;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use fleetstats_events::{EventBus, Subscription};

#[derive(Debug)]
pub enum RedisBusError {
    Redis(String),
    Serialize(String),
}

impl std::fmt::Display for RedisBusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedisBusError::Redis(e) => write!(f, "redis error: {e}"),
            RedisBusError::Serialize(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl std::error::Error for RedisBusError {}

/// Redis pub/sub bus carrying JSON-encoded messages on one channel.
///
/// Typically `RedisPubSubBus<AggregateChanged>` so dashboards attached to
/// other instances see every merge.
#[derive(Debug)]
pub struct RedisPubSubBus<M> {
    client: redis::Client,
    channel: String,
    _message: PhantomData<fn() -> M>,
}

impl<M> Clone for RedisPubSubBus<M> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            channel: self.channel.clone(),
            _message: PhantomData,
        }
    }
}

impl<M> RedisPubSubBus<M> {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
            _message: PhantomData,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl<M> EventBus<M> for RedisPubSubBus<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    type Error = RedisBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        let receivers: i64 = conn
            .publish(&self.channel, payload)
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        debug!(channel = %self.channel, receivers, "published to redis");

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        let client = self.client.clone();
        let channel = self.channel.clone();

        // Forwarding thread; exits when the subscription is dropped or the
        // connection fails.
        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    warn!(%channel, error = %e, "redis subscribe: connection failed");
                    return;
                }
            };

            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(&channel) {
                warn!(%channel, error = %e, "redis subscribe failed");
                return;
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(%channel, error = %e, "redis subscription closed");
                        return;
                    }
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let message: M = match serde_json::from_str(&payload) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(%channel, error = %e, "dropping undecodable message");
                        continue;
                    }
                };

                if tx.send(message).is_err() {
                    return;
                }
            }
        });

        Subscription::new(rx)
    }
}
