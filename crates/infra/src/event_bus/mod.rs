//! Infrastructure event bus implementations.
//!
//! The bus abstraction lives in `fleetstats-events` as pure mechanics.
//! This module provides transports that reach other processes.

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubBus};
