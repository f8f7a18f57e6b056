use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    response::{IntoResponse, Response},
};

use crate::app::dto::IngestBatchRequest;
use crate::app::errors::{ingest_error_to_response, store_error_to_response};
use crate::app::services::{self, AppServices};

/// POST /vehicles/batch
///
/// Malformed records are reported per record and do not fail the request.
pub async fn ingest_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<IngestBatchRequest>,
) -> Response {
    match services.process_batch(&body.records).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => ingest_error_to_response(err),
    }
}

/// GET /fleet-statistics
pub async fn get_statistics(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.statistics().await {
        Ok(view) => Json(view).into_response(),
        Err(err) => store_error_to_response(err),
    }
}

/// GET /fleet-statistics/stream
pub async fn stream_statistics(Extension(services): Extension<Arc<AppServices>>) -> Response {
    services::fleet_statistics_sse(services).into_response()
}
