use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};

use crate::app::AppState;

/// GET /v1/models/all-runnable — every configured alias, flagged when its
/// chain contains an agent-enabled profile.
pub async fn all_runnable(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.current();

    let mut aliases: Vec<&String> = config
        .router_settings
        .model_group_alias
        .keys()
        .collect();
    aliases.sort();

    let data: Vec<serde_json::Value> = aliases
        .into_iter()
        .map(|alias| {
            serde_json::json!({
                "id": alias,
                "name": alias,
                "is_agent": config.is_agent_alias(alias),
            })
        })
        .collect();

    Json(serde_json::json!({ "object": "list", "data": data }))
}
