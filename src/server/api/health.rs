//! Health check handler.

use axum::Json;
use chrono::Utc;

use super::models::HealthResponse;

/// Report that the service is up.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: String::from("healthy"),
        timestamp: Utc::now(),
    })
}
