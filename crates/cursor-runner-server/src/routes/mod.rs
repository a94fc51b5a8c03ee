pub mod agent;
pub mod execute;
pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/cursor/execute", post(execute::execute))
        .route("/cursor/execute/async", post(execute::execute_async))
        .route("/cursor/iterate/async", post(execute::iterate_async))
        .route("/api/agent/new", post(agent::new_conversation))
        .route("/api/agent/list", get(agent::list_conversations))
        .route("/api/agent/:id", get(agent::get_conversation))
        .route("/api/agent/:id/message", post(agent::append_message))
        .route("/health", get(health::health))
        .route("/health/queue", get(health::health_queue))
        .with_state(state)
}
