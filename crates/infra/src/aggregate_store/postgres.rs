//! Postgres-backed aggregate store.
//!
//! The merge is one `INSERT ... ON CONFLICT (id) DO UPDATE` statement:
//!
//! | Column | Merge |
//! |--------|-------|
//! | `total_vehicles`, `hp_sum`, `hp_count` | `stored + delta` |
//! | `vehicles_by_*` (JSONB) | `fleet_stats_add_counts(stored, delta)` |
//! | `hp_min` / `hp_max` | `LEAST` / `GREATEST` (NULL is skipped) |
//! | `last_updated` | `NOW()` |
//!
//! A batch without horsepower binds NULL bounds, so sentinels never reach
//! the stored row.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use fleetstats_core::{BatchSummary, FLEET_AGGREGATE_ID, FleetAggregate, HpStats};

use super::AggregateStore;
use crate::error::{StoreError, map_sqlx_error};
use crate::schema;

const MERGE_SQL: &str = r#"
INSERT INTO fleet_statistics AS fs (
    id, total_vehicles,
    vehicles_by_type, vehicles_by_decade, vehicles_by_speed_class,
    hp_min, hp_max, hp_sum, hp_count, last_updated
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
ON CONFLICT (id) DO UPDATE SET
    total_vehicles          = fs.total_vehicles + EXCLUDED.total_vehicles,
    vehicles_by_type        = fleet_stats_add_counts(fs.vehicles_by_type, EXCLUDED.vehicles_by_type),
    vehicles_by_decade      = fleet_stats_add_counts(fs.vehicles_by_decade, EXCLUDED.vehicles_by_decade),
    vehicles_by_speed_class = fleet_stats_add_counts(fs.vehicles_by_speed_class, EXCLUDED.vehicles_by_speed_class),
    hp_min                  = LEAST(fs.hp_min, EXCLUDED.hp_min),
    hp_max                  = GREATEST(fs.hp_max, EXCLUDED.hp_max),
    hp_sum                  = fs.hp_sum + EXCLUDED.hp_sum,
    hp_count                = fs.hp_count + EXCLUDED.hp_count,
    last_updated            = EXCLUDED.last_updated
RETURNING
    total_vehicles, vehicles_by_type, vehicles_by_decade, vehicles_by_speed_class,
    hp_min, hp_max, hp_sum, hp_count, last_updated
"#;

const LOAD_SQL: &str = r#"
SELECT
    total_vehicles, vehicles_by_type, vehicles_by_decade, vehicles_by_speed_class,
    hp_min, hp_max, hp_sum, hp_count, last_updated
FROM fleet_statistics
WHERE id = $1
"#;

#[derive(Debug, Clone)]
pub struct PostgresAggregateStore {
    pool: Arc<PgPool>,
}

impl PostgresAggregateStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn from_shared(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

fn to_i64(operation: &'static str, field: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Database(format!("{operation}: {field} out of range")))
}

fn to_u64(field: &str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{field} is negative: {value}")))
}

fn counts(operation: &'static str, row: &PgRow, column: &str) -> Result<BTreeMap<String, u64>, StoreError> {
    row.try_get::<Json<BTreeMap<String, u64>>, _>(column)
        .map(|Json(map)| map)
        .map_err(|e| map_sqlx_error(operation, e))
}

fn decode_aggregate(operation: &'static str, row: &PgRow) -> Result<FleetAggregate, StoreError> {
    let get_i64 = |column: &str| -> Result<i64, StoreError> {
        row.try_get::<i64, _>(column).map_err(|e| map_sqlx_error(operation, e))
    };

    let hp_min: Option<f64> = row.try_get("hp_min").map_err(|e| map_sqlx_error(operation, e))?;
    let hp_max: Option<f64> = row.try_get("hp_max").map_err(|e| map_sqlx_error(operation, e))?;
    let hp_sum: f64 = row.try_get("hp_sum").map_err(|e| map_sqlx_error(operation, e))?;
    let last_updated: Option<DateTime<Utc>> = row
        .try_get("last_updated")
        .map_err(|e| map_sqlx_error(operation, e))?;

    Ok(FleetAggregate {
        total_vehicles: to_u64("total_vehicles", get_i64("total_vehicles")?)?,
        vehicles_by_type: counts(operation, row, "vehicles_by_type")?,
        vehicles_by_decade: counts(operation, row, "vehicles_by_decade")?,
        vehicles_by_speed_class: counts(operation, row, "vehicles_by_speed_class")?,
        hp_stats: HpStats {
            min: hp_min,
            max: hp_max,
            sum: hp_sum,
            count: to_u64("hp_count", get_i64("hp_count")?)?,
        },
        last_updated,
    })
}

#[async_trait]
impl AggregateStore for PostgresAggregateStore {
    #[instrument(skip(self, summary), fields(records = summary.count))]
    async fn merge(&self, summary: &BatchSummary) -> Result<FleetAggregate, StoreError> {
        if summary.is_empty() {
            return Ok(self.load().await?.unwrap_or_default());
        }

        let hp = &summary.horsepower;
        let row = sqlx::query(MERGE_SQL)
            .bind(FLEET_AGGREGATE_ID)
            .bind(to_i64("merge", "count", summary.count)?)
            .bind(Json(&summary.by_type))
            .bind(Json(&summary.by_decade))
            .bind(Json(&summary.by_speed_class))
            .bind(hp.min_bound())
            .bind(hp.max_bound())
            .bind(hp.sum)
            .bind(to_i64("merge", "hp_count", hp.count)?)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("merge", e))?;

        let merged = decode_aggregate("merge", &row)?;
        debug!(total = merged.total_vehicles, "aggregate merged");
        Ok(merged)
    }

    #[instrument(skip(self))]
    async fn load(&self) -> Result<Option<FleetAggregate>, StoreError> {
        let row = sqlx::query(LOAD_SQL)
            .bind(FLEET_AGGREGATE_ID)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load", e))?;

        row.as_ref().map(|r| decode_aggregate("load", r)).transpose()
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        schema::bootstrap_aggregate(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_statement_is_a_single_upsert() {
        assert!(MERGE_SQL.contains("ON CONFLICT (id) DO UPDATE"));
        assert!(MERGE_SQL.contains("LEAST(fs.hp_min, EXCLUDED.hp_min)"));
        assert!(MERGE_SQL.contains("GREATEST(fs.hp_max, EXCLUDED.hp_max)"));
        assert!(MERGE_SQL.contains("RETURNING"));
        assert_eq!(MERGE_SQL.matches("fleet_stats_add_counts").count(), 3);
    }

    #[test]
    fn counters_reject_out_of_range_values() {
        assert!(to_i64("merge", "count", u64::MAX).is_err());
        assert_eq!(to_i64("merge", "count", 7).unwrap(), 7);
        assert!(matches!(to_u64("total_vehicles", -1), Err(StoreError::Corrupt(_))));
    }
}
