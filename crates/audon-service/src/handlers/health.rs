//! Health check handler.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Health check handler.
///
/// Pings the durable store. Returns 200 with `status: "healthy"` when it
/// answers, 503 with `status: "unhealthy"` otherwise.
#[instrument(skip_all, name = "audon.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    match state.coordinator.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                database: Some("healthy".to_string()),
            }),
        ),
        Err(e) => {
            tracing::warn!(target: "audon.health", error = %e, "Health check failed: database error");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    database: Some("unhealthy".to_string()),
                }),
            )
        }
    }
}
