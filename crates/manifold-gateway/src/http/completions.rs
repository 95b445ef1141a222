//! OpenAI-compatible unary and streaming endpoints: chat completions,
//! embeddings and speech. All three funnel through the Router so alias
//! fallback and key rotation apply identically.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use manifold_providers::{RequestKind, ResponseBody, StreamDelta};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::http::error::ApiError;

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let alias = alias_of(&body)?;
    let stream = body.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);

    info!(alias = %alias, stream, "chat completions request");

    if stream {
        Ok(handle_streaming(state, alias, body).await.into_response())
    } else {
        route_unary(&state, alias, RequestKind::Chat, body).await
    }
}

pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let alias = alias_of(&body)?;
    info!(alias = %alias, "embeddings request");
    route_unary(&state, alias, RequestKind::Embeddings, body).await
}

pub async fn speech(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let alias = alias_of(&body)?;
    info!(alias = %alias, "speech request");
    route_unary(&state, alias, RequestKind::Speech, body).await
}

fn alias_of(body: &serde_json::Value) -> Result<String, ApiError> {
    body.get("model")
        .and_then(|m| m.as_str())
        .map(String::from)
        .ok_or_else(|| ApiError::bad_request("missing 'model' field"))
}

async fn route_unary(
    state: &AppState,
    alias: String,
    kind: RequestKind,
    body: serde_json::Value,
) -> Result<Response, ApiError> {
    let config = state.config.current();
    let req = manifold_router::RouteRequest { alias, kind, body };

    let routed = state.router.route(&config, &req).await?;
    match routed.body {
        ResponseBody::Json(json) => Ok((StatusCode::OK, Json(json)).into_response()),
        ResponseBody::Bytes { content_type, data } => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type)],
            data,
        )
            .into_response()),
    }
}

/// Streamed chat completions, reassembled into OpenAI `chat.completion.chunk`
/// frames. Profile fallback happens before the first delta; failures after
/// that surface as an error frame on the open stream.
async fn handle_streaming(
    state: Arc<AppState>,
    alias: String,
    body: serde_json::Value,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (tx, rx) = mpsc::channel::<StreamDelta>(64);
    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let model = alias.clone();

    let req = manifold_router::RouteRequest {
        alias,
        kind: RequestKind::Chat,
        body,
    };
    let router = state.router.clone();
    let config = state.config.current();
    tokio::spawn(async move {
        if let Err(e) = router.route_stream(&config, &req, tx.clone()).await {
            warn!(error = %e, "streaming chat completions failed");
            let _ = tx
                .send(StreamDelta::Error {
                    message: e.to_string(),
                })
                .await;
        }
    });

    Sse::new(chunk_stream(id, model, rx)).keep_alive(KeepAlive::default())
}

fn chunk_stream(
    id: String,
    model: String,
    mut rx: mpsc::Receiver<StreamDelta>,
) -> impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(delta) = rx.recv().await {
            match delta {
                StreamDelta::Text { text } => {
                    let chunk = serde_json::json!({
                        "id": id,
                        "object": "chat.completion.chunk",
                        "model": model,
                        "choices": [{
                            "index": 0,
                            "delta": { "role": "assistant", "content": text },
                            "finish_reason": null,
                        }],
                    });
                    yield Ok(Event::default().data(chunk.to_string()));
                }
                StreamDelta::Done => {
                    let chunk = serde_json::json!({
                        "id": id,
                        "object": "chat.completion.chunk",
                        "model": model,
                        "choices": [{
                            "index": 0,
                            "delta": {},
                            "finish_reason": "stop",
                        }],
                    });
                    yield Ok(Event::default().data(chunk.to_string()));
                    yield Ok(Event::default().data("[DONE]"));
                    break;
                }
                StreamDelta::Error { message } => {
                    let err = serde_json::json!({ "error": { "message": message } });
                    yield Ok(Event::default().data(err.to_string()));
                    break;
                }
            }
        }
    }
}
