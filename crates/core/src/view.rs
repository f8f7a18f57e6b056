//! Read-time projection of the aggregate for downstream consumers.
//!
//! Two transforms happen here and never in storage: `avg` is derived from
//! `sum / count`, and raw decade labels (`1980`) become display keys
//! (`decade1980s`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{FleetAggregate, FLEET_AGGREGATE_ID};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HpStatsView {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: u64,
    pub avg: f64,
}

/// What queries and subscriptions return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetAggregateView {
    #[serde(rename = "_id")]
    pub id: String,
    pub total_vehicles: u64,
    pub vehicles_by_type: BTreeMap<String, u64>,
    pub vehicles_by_decade: BTreeMap<String, u64>,
    pub vehicles_by_speed_class: BTreeMap<String, u64>,
    pub hp_stats: HpStatsView,
    pub last_updated: Option<DateTime<Utc>>,
}

impl FleetAggregateView {
    /// View served before the first merge ever happened.
    pub fn zero() -> Self {
        Self {
            id: FLEET_AGGREGATE_ID.to_string(),
            total_vehicles: 0,
            vehicles_by_type: BTreeMap::new(),
            vehicles_by_decade: BTreeMap::new(),
            vehicles_by_speed_class: BTreeMap::new(),
            hp_stats: HpStatsView::default(),
            last_updated: None,
        }
    }

    pub fn project(aggregate: &FleetAggregate) -> Self {
        let hp = &aggregate.hp_stats;
        Self {
            id: FLEET_AGGREGATE_ID.to_string(),
            total_vehicles: aggregate.total_vehicles,
            vehicles_by_type: aggregate.vehicles_by_type.clone(),
            vehicles_by_decade: aggregate
                .vehicles_by_decade
                .iter()
                .map(|(decade, n)| (decade_display_key(decade), *n))
                .collect(),
            vehicles_by_speed_class: aggregate.vehicles_by_speed_class.clone(),
            hp_stats: HpStatsView {
                min: hp.min.unwrap_or(0.0),
                max: hp.max.unwrap_or(0.0),
                sum: hp.sum,
                count: hp.count,
                avg: hp.avg(),
            },
            last_updated: aggregate.last_updated,
        }
    }
}

impl From<&FleetAggregate> for FleetAggregateView {
    fn from(value: &FleetAggregate) -> Self {
        Self::project(value)
    }
}

/// `1980` -> `decade1980s`.
pub fn decade_display_key(label: &str) -> String {
    format!("decade{label}s")
}
