//! Postgres-backed dedup ledger.
//!
//! The unique index on `processed_vehicles(aid)` is the arbiter for racing
//! workers: `ON CONFLICT DO NOTHING ... RETURNING aid` reports only rows this
//! statement actually inserted.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use fleetstats_core::Aid;

use super::DedupLedger;
use crate::error::{StoreError, map_sqlx_error};
use crate::schema;

#[derive(Debug, Clone)]
pub struct PostgresDedupLedger {
    pool: Arc<PgPool>,
}

impl PostgresDedupLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn from_shared(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

fn to_text_array(aids: &[Aid]) -> Vec<String> {
    aids.iter().map(|a| a.as_str().to_owned()).collect()
}

fn decode_aids(rows: &[sqlx::postgres::PgRow], operation: &'static str) -> Result<Vec<Aid>, StoreError> {
    rows.iter()
        .map(|row| {
            let raw: String = row
                .try_get("aid")
                .map_err(|e| map_sqlx_error(operation, e))?;
            Aid::new(raw).map_err(|e| StoreError::Corrupt(format!("{operation}: {e}")))
        })
        .collect()
}

#[async_trait]
impl DedupLedger for PostgresDedupLedger {
    #[instrument(skip(self, aids), fields(candidates = aids.len()))]
    async fn filter_unprocessed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError> {
        if aids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT aid FROM processed_vehicles WHERE aid = ANY($1)")
            .bind(to_text_array(aids))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("filter_unprocessed", e))?;

        let known: HashSet<Aid> = decode_aids(&rows, "filter_unprocessed")?.into_iter().collect();
        Ok(aids.iter().filter(|a| !known.contains(*a)).cloned().collect())
    }

    #[instrument(skip(self, aids), fields(candidates = aids.len()))]
    async fn mark_processed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError> {
        if aids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            INSERT INTO processed_vehicles (aid, processed_at)
            SELECT aid, NOW() FROM UNNEST($1::text[]) AS t(aid)
            ON CONFLICT (aid) DO NOTHING
            RETURNING aid
            "#,
        )
        .bind(to_text_array(aids))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_processed", e))?;

        let inserted: HashSet<Aid> = decode_aids(&rows, "mark_processed")?.into_iter().collect();

        // RETURNING order is unspecified; report in input order, once per id.
        let mut seen = HashSet::with_capacity(inserted.len());
        Ok(aids
            .iter()
            .filter(|a| inserted.contains(*a) && seen.insert((*a).clone()))
            .cloned()
            .collect())
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        schema::bootstrap_ledger(&self.pool).await
    }
}
