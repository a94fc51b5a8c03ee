//! `POST /cursor/execute`, `POST /cursor/execute/async`, `POST
//! /cursor/iterate/async` (spec §6, §4.G).

use axum::extract::State;
use axum::Json;
use cursor_runner_core::facade::AsyncAck;
use cursor_runner_core::request::{ExecutionRequest, ExecutionResult};

use crate::error::ApiError;
use crate::state::AppState;

/// Synchronous single-round execution: the review pass never runs, so the
/// caller's response always reflects the outcome of exactly one main round.
pub async fn execute(State(state): State<AppState>, Json(mut request): Json<ExecutionRequest>) -> Result<Json<ExecutionResult>, ApiError> {
    // Resolved before validation so a rejected request still carries the
    // requestId it would otherwise never have been assigned (spec §7
    // "Propagation policy").
    let (request_id, _) = request.ensure_id();
    let result = state
        .facade
        .execute(request, false, state.shutdown.clone())
        .await
        .map_err(|err| ApiError::new(request_id, err))?;
    Ok(Json(result))
}

/// Fire-and-forget single-round execution; the result is delivered via
/// `callbackUrl` instead of the HTTP response.
pub async fn execute_async(State(state): State<AppState>, Json(mut request): Json<ExecutionRequest>) -> Result<Json<AsyncAck>, ApiError> {
    let (request_id, _) = request.ensure_id();
    let ack = state
        .facade
        .execute_async(request, false, state.shutdown.clone())
        .map_err(|err| ApiError::new(request_id, err))?;
    Ok(Json(ack))
}

/// Fire-and-forget, with the full Review Loop state machine driving
/// multi-round iteration (spec §4.E).
pub async fn iterate_async(State(state): State<AppState>, Json(mut request): Json<ExecutionRequest>) -> Result<Json<AsyncAck>, ApiError> {
    let (request_id, _) = request.ensure_id();
    let ack = state
        .facade
        .execute_async(request, true, state.shutdown.clone())
        .map_err(|err| ApiError::new(request_id, err))?;
    Ok(Json(ack))
}
