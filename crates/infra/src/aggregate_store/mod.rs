//! Aggregate Store: the singleton fleet statistics document.
//!
//! `merge` must be a single atomic server-side update. Implementations never
//! read-modify-write across round trips, so concurrent merges from different
//! workers cannot lose updates.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use fleetstats_core::{BatchSummary, FleetAggregate};

use crate::error::StoreError;

pub use in_memory::InMemoryAggregateStore;
pub use postgres::PostgresAggregateStore;

#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Atomically fold `summary` into the aggregate (creating it when
    /// absent) and return the post-merge state.
    ///
    /// An empty summary changes nothing.
    async fn merge(&self, summary: &BatchSummary) -> Result<FleetAggregate, StoreError>;

    /// Current aggregate, or `None` if nothing was ever merged.
    async fn load(&self) -> Result<Option<FleetAggregate>, StoreError>;

    /// Create the uniqueness constraint on the aggregate key (idempotent).
    async fn ensure_indexes(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> AggregateStore for Arc<S>
where
    S: AggregateStore + ?Sized,
{
    async fn merge(&self, summary: &BatchSummary) -> Result<FleetAggregate, StoreError> {
        (**self).merge(summary).await
    }

    async fn load(&self) -> Result<Option<FleetAggregate>, StoreError> {
        (**self).load().await
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        (**self).ensure_indexes().await
    }
}
