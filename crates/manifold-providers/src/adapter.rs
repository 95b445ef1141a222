use async_trait::async_trait;
use manifold_keys::Credential;
use tokio::sync::mpsc;

use crate::stream::StreamDelta;

/// Which unified operation the client invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Chat,
    Embeddings,
    Speech,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Chat => "chat",
            RequestKind::Embeddings => "embeddings",
            RequestKind::Speech => "speech",
        }
    }
}

/// A request on its way upstream. The router has already substituted the
/// upstream model name into `body` and merged the profile's generation
/// parameters; adapters reshape `body` into their provider's wire format.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub kind: RequestKind,
    /// OpenAI-shaped request body (`model`, `messages`/`input`, params).
    pub body: serde_json::Value,
    /// Profile-level base URL override (no trailing slash).
    pub api_base: Option<String>,
}

/// Non-streaming response body.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Json(serde_json::Value),
    /// Binary payloads (audio). Never cached.
    Bytes {
        content_type: String,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub body: ResponseBody,
}

impl UpstreamResponse {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            body: ResponseBody::Json(body),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match &self.body {
            ResponseBody::Json(v) => Some(v),
            ResponseBody::Bytes { .. } => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Transport-level failure (connect, TLS, timeout). The credential is
    /// not implicated; the executor quarantines and moves on.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream answered with a non-2xx status. The executor classifies
    /// `status` + `body` into permanent / transient / request-content.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    /// The profile routed an operation this provider cannot serve.
    #[error("provider '{provider}' does not support {kind:?}")]
    Unsupported {
        provider: String,
        kind: RequestKind,
    },
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        AdapterError::Network(e.to_string())
    }
}

/// One upstream provider family. Implementations are stateless beyond an
/// HTTP client and endpoint configuration; credentials always arrive from
/// the pool per call.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider tag for logging and credential-file lookup.
    fn tag(&self) -> &str;

    /// Perform a non-streaming call.
    async fn call(
        &self,
        req: &UpstreamRequest,
        cred: &Credential,
    ) -> Result<UpstreamResponse, AdapterError>;

    /// Perform a streaming chat call, emitting deltas through `tx`.
    ///
    /// Must return an `Err` before any delta is sent when the upstream
    /// rejects the request (so the executor can still rotate credentials);
    /// failures after streaming has begun surface as `StreamDelta::Error`.
    ///
    /// Default: non-streaming call re-emitted as a single delta.
    async fn call_stream(
        &self,
        req: &UpstreamRequest,
        cred: &Credential,
        tx: mpsc::Sender<StreamDelta>,
    ) -> Result<(), AdapterError> {
        let resp = self.call(req, cred).await?;
        if let Some(json) = resp.as_json() {
            if let Some(text) = extract_chat_text(json) {
                let _ = tx.send(StreamDelta::Text { text }).await;
            }
        }
        let _ = tx.send(StreamDelta::Done).await;
        Ok(())
    }
}

/// Pull the assistant text out of an OpenAI-shaped chat response.
pub fn extract_chat_text(body: &serde_json::Value) -> Option<String> {
    body.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(String::from)
}
