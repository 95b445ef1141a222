//! Admin surface: config read/write with hot reload, prompt file
//! management, pattern discovery, pool introspection, restart.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use manifold_agent::PatternLibrary;
use manifold_core::config::GatewayConfig;
use serde::Deserialize;
use tracing::{info, warn};

use crate::app::AppState;
use crate::http::error::ApiError;

/// GET /admin/config — the active configuration as YAML.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let config = state.config.current();
    let yaml = serde_yaml::to_string(config.as_ref())
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/yaml")],
        yaml,
    )
        .into_response())
}

/// POST /admin/config — validate, persist and hot-swap a new YAML config.
/// In-flight requests keep the snapshot they started with.
pub async fn post_config(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Response, ApiError> {
    let new_config = GatewayConfig::from_yaml(&body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "CONFIG_ERROR", e.to_string()))?;

    if let Err(e) = std::fs::write(&state.config_path, &body) {
        warn!(path = %state.config_path, error = %e, "config write-back failed");
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "IO_ERROR",
            e.to_string(),
        ));
    }

    state.config.replace(new_config);
    info!("configuration reloaded via admin api");
    Ok(Json(serde_json::json!({ "reloaded": true })).into_response())
}

#[derive(Deserialize)]
pub struct PromptPathQuery {
    pub path: String,
}

/// Resolve a client-supplied relative path under the prompts dir,
/// rejecting absolute paths and any traversal component.
fn resolve_prompt_path(base: &str, rel: &str) -> Result<PathBuf, ApiError> {
    let rel_path = Path::new(rel);
    let traversal = rel_path.is_absolute()
        || rel_path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
    if traversal {
        return Err(ApiError::bad_request("path escapes the prompts directory"));
    }
    Ok(Path::new(base).join(rel_path))
}

/// GET /admin/prompt_content?path=… — read a prompt/manifest file.
pub async fn get_prompt_content(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PromptPathQuery>,
) -> Result<Response, ApiError> {
    let config = state.config.current();
    let path = resolve_prompt_path(&config.prompts_dir, &query.path)?;
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            content,
        )
            .into_response()),
        Err(e) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{}: {e}", query.path),
        )),
    }
}

/// POST /admin/prompt_content?path=… — write a prompt/manifest file.
pub async fn post_prompt_content(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PromptPathQuery>,
    body: String,
) -> Result<Response, ApiError> {
    let config = state.config.current();
    let path = resolve_prompt_path(&config.prompts_dir, &query.path)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()))?;
    }
    std::fs::write(&path, body)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()))?;
    info!(path = %query.path, "prompt file written");
    Ok(Json(serde_json::json!({ "written": true })).into_response())
}

/// GET /admin/prompts — relative paths of every prompt/manifest file.
pub async fn list_prompts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.current();
    let base = PathBuf::from(&config.prompts_dir);
    let mut files = Vec::new();
    collect_files(&base, &base, &mut files);
    files.sort();
    Json(serde_json::json!({ "files": files }))
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(base, &path, out);
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}

/// GET /admin/react_patterns — pattern names discovered on disk right now.
/// The engine keeps using the set it loaded at startup; a restart applies
/// edits.
pub async fn list_react_patterns(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.current();
    let on_disk = PatternLibrary::load(Path::new(&config.prompts_dir));
    Json(serde_json::json!({
        "patterns": on_disk.names(),
        "active": state.patterns.names(),
    }))
}

/// GET /admin/provider_models — UI-only provider → model mapping.
pub async fn provider_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.current().provider_models())
}

/// GET /admin/key_pool — aggregate credential counts per provider/state.
pub async fn key_pool(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.pool.snapshot())
}

/// POST /admin/restart — orderly shutdown; the process exits with the
/// restart code and the supervisor brings it back up.
pub async fn restart(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("restart requested via admin api");
    state
        .restart_requested
        .store(true, std::sync::atomic::Ordering::SeqCst);
    state.shutdown.cancel();
    Json(serde_json::json!({ "restarting": true }))
}
