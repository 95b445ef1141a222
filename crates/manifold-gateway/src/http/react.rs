//! Reasoning sessions: enqueue the task, handshake with the worker, then
//! bridge the session channel onto the client's SSE connection.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use manifold_bus::{await_worker_ack, frame_stream, HANDSHAKE_TIMEOUT_SECS};
use manifold_core::GatewayError;
use manifold_queue::SessionTask;
use serde::Deserialize;
use tracing::{info, warn};

use crate::app::AppState;
use crate::http::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    pub user_query: String,
    pub model_alias: String,
    pub reasoning_mode: Option<String>,
    pub client_system_instruction: Option<String>,
    #[serde(default)]
    pub client_manifests: Vec<String>,
    #[serde(default)]
    pub safety_flags: Vec<String>,
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReactRequest>,
) -> Result<Response, ApiError> {
    let config = state.config.current();
    if config.chain(&req.model_alias).is_none() {
        return Err(GatewayError::AliasNotFound {
            alias: req.model_alias.clone(),
        }
        .into());
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let trace_id = uuid::Uuid::new_v4().to_string();
    info!(session_id = %session_id, alias = %req.model_alias, "reasoning session created");

    // subscribe BEFORE enqueueing: the channel is non-retentive, so the
    // worker's ack must have somewhere to land
    let mut sub = state.bus.subscribe(&session_id);

    let task = SessionTask {
        session_id: session_id.clone(),
        alias: req.model_alias,
        user_query: req.user_query,
        reasoning_mode: req.reasoning_mode,
        client_system_instruction: req.client_system_instruction,
        client_manifests: req.client_manifests,
        safety_flags: req.safety_flags,
        enqueued_at: chrono::Utc::now().to_rfc3339(),
        trace_id,
    };
    state
        .queue
        .enqueue(&task)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let ack = match await_worker_ack(&mut sub, Duration::from_secs(HANDSHAKE_TIMEOUT_SECS)).await
    {
        Ok(ack) => ack,
        Err(_) => {
            warn!(session_id = %session_id, "worker handshake timed out");
            return Err(GatewayError::WorkerTimeout.into());
        }
    };

    let read_timeout = Duration::from_secs(config.agent_settings.sse_read_timeout_secs);
    // frames are already `data: <json>\n\n`; write them verbatim
    let body_stream = frame_stream(sub, ack, read_timeout)
        .map(|frame| Ok::<_, std::convert::Infallible>(bytes::Bytes::from(frame)));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body_stream),
    )
        .into_response())
}
