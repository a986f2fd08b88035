use axum::http::StatusCode;

use crate::models::{Envelope, HealthResponse};

/// `GET /health`
pub async fn health_handler() -> Envelope<HealthResponse> {
    Envelope::success(
        StatusCode::OK,
        "Service is healthy",
        HealthResponse {
            status: "ok".into(),
            version: warden_core::version().into(),
        },
    )
}
