use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use fleetstats_infra::{IngestError, StoreError};

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    if err.is_transient() {
        json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", err.to_string())
    } else {
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
    }
}

pub fn ingest_error_to_response(err: IngestError) -> axum::response::Response {
    match err {
        IngestError::Store(e) => store_error_to_response(e),
        err @ IngestError::ReconciliationRequired { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "reconciliation_required", err.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
