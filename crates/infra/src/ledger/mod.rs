//! Dedup Ledger: durable set of identifiers already accounted for.
//!
//! `filter_unprocessed` followed by `mark_processed` is **not** atomic as a
//! unit. Two workers can both see an identifier as unprocessed; the store's
//! uniqueness constraint decides which insert wins. The loser simply does not
//! find the identifier in `mark_processed`'s result, which is a benign
//! duplicate, never an error.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetstats_core::Aid;

use crate::error::StoreError;

pub use in_memory::InMemoryDedupLedger;
pub use postgres::PostgresDedupLedger;

/// Ledger entry: at most one ever exists per `aid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedAid {
    pub aid: Aid,
    pub processed_at: DateTime<Utc>,
}

#[async_trait]
pub trait DedupLedger: Send + Sync {
    /// Subset of `aids` absent from the ledger at the time of the check,
    /// in input order.
    async fn filter_unprocessed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError>;

    /// Record `aids`, ignoring ones already present.
    ///
    /// Returns exactly the identifiers this call inserted.
    async fn mark_processed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError>;

    /// Create the uniqueness constraint on `aid` (idempotent).
    async fn ensure_indexes(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<L> DedupLedger for Arc<L>
where
    L: DedupLedger + ?Sized,
{
    async fn filter_unprocessed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError> {
        (**self).filter_unprocessed(aids).await
    }

    async fn mark_processed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError> {
        (**self).mark_processed(aids).await
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        (**self).ensure_indexes().await
    }
}
