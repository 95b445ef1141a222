use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, warn};

use crate::registry::{check_required, ToolError, ToolRegistry};

/// Assemble the tool server's axum router.
pub fn build_router(registry: Arc<ToolRegistry>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(invoke_tool))
        .with_state(registry)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "manifold-tools" }))
}

/// Metadata surface: the descriptor array the reasoning engine folds into
/// its prompts.
async fn list_tools(State(registry): State<Arc<ToolRegistry>>) -> impl IntoResponse {
    Json(registry.descriptors())
}

async fn invoke_tool(
    State(registry): State<Arc<ToolRegistry>>,
    Path(name): Path<String>,
    Json(args): Json<serde_json::Value>,
) -> impl IntoResponse {
    let Some(tool) = registry.get(&name) else {
        warn!(tool = %name, "unknown tool requested");
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown tool: {name}") })),
        );
    };

    if let Err(e) = check_required(&tool.descriptor(), &args) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": e.to_string() })),
        );
    }

    info!(tool = %name, "invoking tool");
    match tool.invoke(args).await {
        Ok(result) => (StatusCode::OK, Json(result)),
        Err(e @ (ToolError::MissingArgument { .. } | ToolError::InvalidArgument { .. })) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
        Err(e) => {
            warn!(tool = %name, error = %e, "tool failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}
