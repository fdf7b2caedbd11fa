use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use utoipa::ToSchema;

use crate::AppState;

/// Component health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub version: String,
    pub database: ComponentStatus,
    pub database_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness probe: answers 503 while the database is unreachable
#[utoipa::path(
    get,
    path = "/health",
    summary = "Health check",
    responses(
        (status = 200, description = "Service ready", body = HealthReport),
        (status = 503, description = "Database unreachable", body = HealthReport),
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let started = Instant::now();
    let db_result = crate::db::check_connection(&state.db).await;
    let database_latency_ms = started.elapsed().as_millis() as u64;

    match db_result {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthReport {
                status: ComponentStatus::Up,
                version: env!("CARGO_PKG_VERSION").to_string(),
                database: ComponentStatus::Up,
                database_latency_ms,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthReport {
                    status: ComponentStatus::Down,
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    database: ComponentStatus::Down,
                    database_latency_ms,
                    error: Some("database unreachable".to_string()),
                }),
            )
        }
    }
}
