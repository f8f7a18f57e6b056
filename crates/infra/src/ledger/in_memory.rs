use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use fleetstats_core::Aid;

use super::{DedupLedger, ProcessedAid};
use crate::error::StoreError;

/// In-memory ledger for tests/dev and single-process deployments.
///
/// The write lock plays the role of the unique index: concurrent
/// `mark_processed` calls for the same identifier have exactly one winner.
#[derive(Debug, Default)]
pub struct InMemoryDedupLedger {
    entries: RwLock<HashMap<Aid, ProcessedAid>>,
}

impl InMemoryDedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, aid: &Aid) -> Option<ProcessedAid> {
        self.entries.read().ok()?.get(aid).cloned()
    }
}

#[async_trait]
impl DedupLedger for InMemoryDedupLedger {
    async fn filter_unprocessed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(aids
            .iter()
            .filter(|aid| !entries.contains_key(*aid))
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        let now = Utc::now();

        let mut inserted = Vec::with_capacity(aids.len());
        for aid in aids {
            if let Entry::Vacant(slot) = entries.entry(aid.clone()) {
                slot.insert(ProcessedAid {
                    aid: aid.clone(),
                    processed_at: now,
                });
                inserted.push(aid.clone());
            }
        }

        Ok(inserted)
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
