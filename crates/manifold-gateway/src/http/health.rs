use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};

use crate::app::AppState;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pending = state.queue.pending_count().unwrap_or(0);
    Json(serde_json::json!({
        "status": "ok",
        "service": "manifold-gateway",
        "active_sessions": state.bus.active_sessions(),
        "queued_tasks": pending,
    }))
}
