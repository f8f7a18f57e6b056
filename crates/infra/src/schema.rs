//! Idempotent Postgres schema bootstrap.
//!
//! Safe to run on every start: tables, indexes and the merge helper function
//! are created only when missing or replaced in place.

use sqlx::PgPool;
use tracing::info;

use crate::error::{StoreError, map_sqlx_error};

pub const LEDGER_TABLE: &str = "processed_vehicles";
pub const AGGREGATE_TABLE: &str = "fleet_statistics";

pub(crate) const CREATE_LEDGER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS processed_vehicles (
    aid          TEXT        NOT NULL,
    processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub(crate) const CREATE_LEDGER_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS processed_vehicles_aid_key
    ON processed_vehicles (aid)
"#;

pub(crate) const CREATE_AGGREGATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fleet_statistics (
    id                      TEXT             NOT NULL,
    total_vehicles          BIGINT           NOT NULL DEFAULT 0,
    vehicles_by_type        JSONB            NOT NULL DEFAULT '{}'::jsonb,
    vehicles_by_decade      JSONB            NOT NULL DEFAULT '{}'::jsonb,
    vehicles_by_speed_class JSONB            NOT NULL DEFAULT '{}'::jsonb,
    hp_min                  DOUBLE PRECISION NULL,
    hp_max                  DOUBLE PRECISION NULL,
    hp_sum                  DOUBLE PRECISION NOT NULL DEFAULT 0,
    hp_count                BIGINT           NOT NULL DEFAULT 0,
    last_updated            TIMESTAMPTZ      NULL
)
"#;

pub(crate) const CREATE_AGGREGATE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS fleet_statistics_id_key
    ON fleet_statistics (id)
"#;

/// Key-wise sum of two `{ key: count }` objects.
pub(crate) const CREATE_ADD_COUNTS_FN: &str = r#"
CREATE OR REPLACE FUNCTION fleet_stats_add_counts(a JSONB, b JSONB)
RETURNS JSONB
LANGUAGE SQL
IMMUTABLE
AS $$
    SELECT COALESCE(jsonb_object_agg(key, total), '{}'::jsonb)
    FROM (
        SELECT key, SUM(value::BIGINT)::BIGINT AS total
        FROM (
            SELECT key, value FROM jsonb_each_text(COALESCE(a, '{}'::jsonb))
            UNION ALL
            SELECT key, value FROM jsonb_each_text(COALESCE(b, '{}'::jsonb))
        ) AS entries
        GROUP BY key
    ) AS summed
$$
"#;

async fn execute_all(pool: &PgPool, operation: &'static str, statements: &[&str]) -> Result<(), StoreError> {
    for &sql in statements {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
    }
    Ok(())
}

pub async fn bootstrap_ledger(pool: &PgPool) -> Result<(), StoreError> {
    execute_all(pool, "bootstrap_ledger", &[CREATE_LEDGER_TABLE, CREATE_LEDGER_INDEX]).await
}

pub async fn bootstrap_aggregate(pool: &PgPool) -> Result<(), StoreError> {
    execute_all(
        pool,
        "bootstrap_aggregate",
        &[CREATE_AGGREGATE_TABLE, CREATE_AGGREGATE_INDEX, CREATE_ADD_COUNTS_FN],
    )
    .await
}

/// Create every table, index and function the Postgres stores rely on.
pub async fn bootstrap_schema(pool: &PgPool) -> Result<(), StoreError> {
    bootstrap_ledger(pool).await?;
    bootstrap_aggregate(pool).await?;
    info!(ledger = LEDGER_TABLE, aggregate = AGGREGATE_TABLE, "schema bootstrap complete");
    Ok(())
}
