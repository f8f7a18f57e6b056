//! Aggregate Projection Reader: serves the committed aggregate to queries.

use std::time::Duration;

use fleetstats_core::FleetAggregateView;

use crate::aggregate_store::AggregateStore;
use crate::error::StoreError;
use crate::retry::{RetryPolicy, run_with_retry};

#[derive(Debug, Clone)]
pub struct AggregateProjectionReader<S> {
    store: S,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<S> AggregateProjectionReader<S>
where
    S: AggregateStore,
{
    pub fn new(store: S, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            store,
            retry,
            timeout,
        }
    }

    /// Current statistics, or the zero view when nothing was merged yet.
    ///
    /// Reads are side-effect free, so transient failures are retried.
    pub async fn read(&self) -> Result<FleetAggregateView, StoreError> {
        let loaded = run_with_retry(&self.retry, self.timeout, "load_aggregate", || self.store.load()).await?;

        Ok(loaded
            .as_ref()
            .map(FleetAggregateView::project)
            .unwrap_or_else(FleetAggregateView::zero))
    }
}
