//! `GET /health`, `GET /health/queue` (spec §6).

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", service: "cursor-runner" })
}

#[derive(Debug, Serialize)]
pub struct QueueStatus {
    pub available: usize,
    pub waiting: usize,
    pub max_concurrent: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthQueueResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub queue: QueueStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<&'static str>,
}

/// `warning` is non-null when `available == 0` (spec §6 "`GET
/// /health/queue`").
pub async fn health_queue(State(state): State<AppState>) -> Json<HealthQueueResponse> {
    let status = state.semaphore.status();
    let warning = (status.available == 0).then_some("no admission slots available, requests will queue");
    Json(HealthQueueResponse {
        status: "ok",
        service: "cursor-runner",
        queue: QueueStatus { available: status.available, waiting: status.waiting, max_concurrent: status.max_concurrent },
        warning,
    })
}
