use axum::{
    Router,
    routing::{get, post},
};

pub mod fleet;
pub mod system;

/// Router for the fleet statistics endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/vehicles/batch", post(fleet::ingest_batch))
        .route("/fleet-statistics", get(fleet::get_statistics))
        .route("/fleet-statistics/stream", get(fleet::stream_statistics))
}
