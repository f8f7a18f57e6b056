use serde::Deserialize;

use fleetstats_core::VehicleRecord;

/// `POST /vehicles/batch` body.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestBatchRequest {
    #[serde(default)]
    pub records: Vec<VehicleRecord>,
}
