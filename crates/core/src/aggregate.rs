//! The global fleet aggregate and its commutative merge algebra.
//!
//! Every field is updated with an operation whose result does not depend on
//! the order in which summaries arrive:
//!
//! - counters and mapping entries: additive increment
//! - horsepower bounds: running minimum / maximum, skipped for sentinels
//!
//! `avg` is derived at read time and never stored here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::summary::BatchSummary;

/// Fixed key of the singleton aggregate document.
pub const FLEET_AGGREGATE_ID: &str = "real_time_fleet_stats";

/// Stored horsepower statistics.
///
/// `min`/`max` stay `None` until the first batch that carries a horsepower
/// value; afterwards `min` only decreases and `max` only increases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HpStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sum: f64,
    pub count: u64,
}

impl HpStats {
    /// `sum / count`, or 0 when nothing was counted.
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Running statistics for the whole fleet (persistent singleton).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetAggregate {
    pub total_vehicles: u64,
    pub vehicles_by_type: BTreeMap<String, u64>,
    pub vehicles_by_decade: BTreeMap<String, u64>,
    pub vehicles_by_speed_class: BTreeMap<String, u64>,
    pub hp_stats: HpStats,
    pub last_updated: Option<DateTime<Utc>>,
}

impl FleetAggregate {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fold a batch summary into the aggregate.
    ///
    /// An empty summary leaves the aggregate untouched (including
    /// `last_updated`).
    pub fn apply(&mut self, summary: &BatchSummary, now: DateTime<Utc>) {
        if summary.is_empty() {
            return;
        }

        self.total_vehicles += summary.count;
        add_counts(&mut self.vehicles_by_type, &summary.by_type);
        add_counts(&mut self.vehicles_by_decade, &summary.by_decade);
        add_counts(&mut self.vehicles_by_speed_class, &summary.by_speed_class);

        let hp = &summary.horsepower;
        self.hp_stats.sum += hp.sum;
        self.hp_stats.count += hp.count;

        if let Some(min) = hp.min_bound() {
            self.hp_stats.min = Some(self.hp_stats.min.map_or(min, |cur| cur.min(min)));
        }
        if let Some(max) = hp.max_bound() {
            self.hp_stats.max = Some(self.hp_stats.max.map_or(max, |cur| cur.max(max)));
        }

        self.last_updated = Some(now);
    }
}

fn add_counts(target: &mut BTreeMap<String, u64>, delta: &BTreeMap<String, u64>) {
    for (key, n) in delta {
        *target.entry(key.clone()).or_insert(0) += n;
    }
}
