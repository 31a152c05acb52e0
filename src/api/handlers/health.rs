use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub scanner: String,
    pub storage: String,
    pub free_bytes: Option<u64>,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Ingestion pipeline health", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let scanner_status = if state.ingest.scanner().health_check().await {
        "available"
    } else {
        "unavailable"
    };

    let storage_status = match tokio::fs::try_exists(state.ingest.store().temp_dir()).await {
        Ok(true) => "ready",
        _ => "unavailable",
    };

    let status = if scanner_status == "available" && storage_status == "ready" {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        scanner: scanner_status.to_string(),
        storage: storage_status.to_string(),
        free_bytes: state.ingest.disk_guard().available_bytes().await,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
