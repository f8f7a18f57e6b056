//! Messages flowing through the buses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fleetstats_core::{FleetAggregateView, VehicleRecord};

/// A message with a stable type name.
///
/// Messages are immutable facts; consumers must tolerate duplicates.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (also used as the SSE event name).
    fn event_type(&self) -> &'static str;

    /// When the event occurred.
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// "The aggregate changed" announcement carrying the post-merge snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateChanged {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub view: FleetAggregateView,
}

impl AggregateChanged {
    pub fn new(view: FleetAggregateView) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            view,
        }
    }
}

impl Event for AggregateChanged {
    fn event_type(&self) -> &'static str {
        "FleetStatisticsUpdated"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// One delivery from the record source. May be delivered more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleBatch {
    pub batch_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub records: Vec<VehicleRecord>,
}

impl VehicleBatch {
    pub fn new(records: Vec<VehicleRecord>) -> Self {
        Self {
            batch_id: Uuid::now_v7(),
            received_at: Utc::now(),
            records,
        }
    }
}

impl Event for VehicleBatch {
    fn event_type(&self) -> &'static str {
        "VehicleBatchReceived"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}
