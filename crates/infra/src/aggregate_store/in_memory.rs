use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use fleetstats_core::{BatchSummary, FleetAggregate};

use super::AggregateStore;
use crate::error::StoreError;

/// In-memory aggregate store for tests/dev.
///
/// The whole merge runs under one write lock, which gives the same
/// "single atomic update" guarantee the Postgres upsert does.
#[derive(Debug, Default)]
pub struct InMemoryAggregateStore {
    aggregate: RwLock<Option<FleetAggregate>>,
}

impl InMemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn merge(&self, summary: &BatchSummary) -> Result<FleetAggregate, StoreError> {
        let mut guard = self.aggregate.write().map_err(|_| StoreError::Poisoned)?;

        if summary.is_empty() {
            return Ok(guard.clone().unwrap_or_default());
        }

        let aggregate = guard.get_or_insert_with(FleetAggregate::empty);
        aggregate.apply(summary, Utc::now());
        Ok(aggregate.clone())
    }

    async fn load(&self) -> Result<Option<FleetAggregate>, StoreError> {
        let guard = self.aggregate.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.clone())
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
