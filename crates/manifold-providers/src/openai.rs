use std::ops::ControlFlow;

use async_trait::async_trait;
use manifold_keys::Credential;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::adapter::{
    AdapterError, ProviderAdapter, RequestKind, ResponseBody, UpstreamRequest, UpstreamResponse,
};
use crate::stream::{pump_sse_lines, StreamDelta};

const EMBEDDINGS_PATH: &str = "/v1/embeddings";
const SPEECH_PATH: &str = "/v1/audio/speech";

/// Adapter for OpenAI and every OpenAI-compatible endpoint. Most provider
/// tags in the registry resolve to an instance of this with a different
/// base URL.
pub struct OpenAiAdapter {
    client: reqwest::Client,
    tag: String,
    base_url: String,
    chat_path: String,
}

impl OpenAiAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self::compatible(
            client,
            "openai",
            "https://api.openai.com",
            "/v1/chat/completions",
        )
    }

    /// A named OpenAI-compatible provider. `base_url` has no trailing
    /// slash; `chat_path` starts with "/".
    pub fn compatible(
        client: reqwest::Client,
        tag: impl Into<String>,
        base_url: impl Into<String>,
        chat_path: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tag: tag.into(),
            base_url: base_url.into(),
            chat_path: chat_path.into(),
        }
    }

    fn url(&self, req: &UpstreamRequest) -> String {
        let base = req.api_base.as_deref().unwrap_or(&self.base_url);
        let path = match req.kind {
            RequestKind::Chat => self.chat_path.as_str(),
            RequestKind::Embeddings => EMBEDDINGS_PATH,
            RequestKind::Speech => SPEECH_PATH,
        };
        format!("{base}{path}")
    }

    async fn post(
        &self,
        req: &UpstreamRequest,
        cred: &Credential,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, AdapterError> {
        let url = self.url(req);
        debug!(provider = %self.tag, kind = req.kind.as_str(), "sending upstream request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&cred.secret)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(provider = %self.tag, status, body = %text, "upstream API error");
            return Err(AdapterError::Api { status, body: text });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn call(
        &self,
        req: &UpstreamRequest,
        cred: &Credential,
    ) -> Result<UpstreamResponse, AdapterError> {
        let mut body = req.body.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.remove("stream");
        }

        let resp = self.post(req, cred, &body).await?;

        // speech responses are audio bytes, everything else is JSON
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();

        if content_type.starts_with("application/json") {
            let json = resp
                .json()
                .await
                .map_err(|e| AdapterError::Parse(e.to_string()))?;
            Ok(UpstreamResponse::json(json))
        } else {
            let data = resp.bytes().await?.to_vec();
            Ok(UpstreamResponse {
                body: ResponseBody::Bytes { content_type, data },
            })
        }
    }

    async fn call_stream(
        &self,
        req: &UpstreamRequest,
        cred: &Credential,
        tx: mpsc::Sender<StreamDelta>,
    ) -> Result<(), AdapterError> {
        if req.kind != RequestKind::Chat {
            return Err(AdapterError::Unsupported {
                provider: self.tag.clone(),
                kind: req.kind,
            });
        }

        let mut body = req.body.clone();
        body["stream"] = serde_json::json!(true);

        let resp = self.post(req, cred, &body).await?;

        pump_sse_lines(resp, &tx, |line| {
            let Some(crate::stream::SseParsed::Data(data)) = crate::stream::parse_sse_line(line)
            else {
                return ControlFlow::Continue(Vec::new());
            };
            if data.trim() == "[DONE]" {
                return ControlFlow::Break(());
            }
            let mut out = Vec::new();
            if let Ok(chunk) = serde_json::from_str::<StreamChunk>(&data) {
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            out.push(StreamDelta::Text { text: content });
                        }
                    }
                }
            }
            ControlFlow::Continue(out)
        })
        .await;

        let _ = tx.send(StreamDelta::Done).await;
        Ok(())
    }
}

// OpenAI streaming chunk types

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}
