use std::ops::ControlFlow;

use async_trait::async_trait;
use manifold_keys::Credential;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::adapter::{
    AdapterError, ProviderAdapter, RequestKind, UpstreamRequest, UpstreamResponse,
};
use crate::stream::{parse_sse_line, pump_sse_lines, SseParsed, StreamDelta};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(
        &self,
        req: &UpstreamRequest,
        cred: &Credential,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, AdapterError> {
        let base = req.api_base.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{base}/v1/messages");

        debug!(provider = "anthropic", "sending upstream request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &cred.secret)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(provider = "anthropic", status, body = %text, "upstream API error");
            return Err(AdapterError::Api { status, body: text });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn tag(&self) -> &str {
        "anthropic"
    }

    async fn call(
        &self,
        req: &UpstreamRequest,
        cred: &Credential,
    ) -> Result<UpstreamResponse, AdapterError> {
        if req.kind != RequestKind::Chat {
            return Err(AdapterError::Unsupported {
                provider: "anthropic".to_string(),
                kind: req.kind,
            });
        }

        let body = to_messages_body(&req.body);
        let resp = self.post(req, cred, &body).await?;

        let api_resp: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))?;

        Ok(UpstreamResponse::json(to_openai_response(api_resp)))
    }

    async fn call_stream(
        &self,
        req: &UpstreamRequest,
        cred: &Credential,
        tx: mpsc::Sender<StreamDelta>,
    ) -> Result<(), AdapterError> {
        if req.kind != RequestKind::Chat {
            return Err(AdapterError::Unsupported {
                provider: "anthropic".to_string(),
                kind: req.kind,
            });
        }

        let mut body = to_messages_body(&req.body);
        body["stream"] = serde_json::json!(true);

        let resp = self.post(req, cred, &body).await?;

        let mut current_event = String::new();
        pump_sse_lines(resp, &tx, |line| {
            match parse_sse_line(line) {
                Some(SseParsed::Event(ev)) => {
                    current_event = ev;
                    ControlFlow::Continue(Vec::new())
                }
                Some(SseParsed::Data(data)) => match current_event.as_str() {
                    "content_block_delta" => {
                        let mut out = Vec::new();
                        if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(&data) {
                            if let Some(text) = delta.delta.text {
                                if !text.is_empty() {
                                    out.push(StreamDelta::Text { text });
                                }
                            }
                        }
                        ControlFlow::Continue(out)
                    }
                    "message_stop" => ControlFlow::Break(()),
                    "error" => ControlFlow::Continue(vec![StreamDelta::Error {
                        message: data,
                    }]),
                    _ => ControlFlow::Continue(Vec::new()),
                },
                None => ControlFlow::Continue(Vec::new()),
            }
        })
        .await;

        let _ = tx.send(StreamDelta::Done).await;
        Ok(())
    }
}

/// Reshape an OpenAI-style chat body into the Anthropic messages format:
/// system messages lift out into the top-level `system` field, and
/// `max_tokens` becomes mandatory.
fn to_messages_body(openai_body: &serde_json::Value) -> serde_json::Value {
    let empty = Vec::new();
    let in_messages = openai_body
        .get("messages")
        .and_then(|m| m.as_array())
        .unwrap_or(&empty);

    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<serde_json::Value> = Vec::new();

    for msg in in_messages {
        let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("user");
        let content = msg.get("content").and_then(|c| c.as_str()).unwrap_or("");
        if role == "system" {
            system_parts.push(content.to_string());
        } else {
            messages.push(serde_json::json!({ "role": role, "content": content }));
        }
    }

    let mut body = serde_json::json!({
        "model": openai_body.get("model").cloned().unwrap_or_default(),
        "messages": messages,
        "max_tokens": openai_body
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_TOKENS as u64),
    });

    if !system_parts.is_empty() {
        body["system"] = serde_json::json!(system_parts.join("\n\n"));
    }
    for param in ["temperature", "top_p"] {
        if let Some(v) = openai_body.get(param) {
            body[param] = v.clone();
        }
    }

    body
}

/// Reshape an Anthropic messages response back into the OpenAI chat shape
/// the client speaks.
fn to_openai_response(resp: MessagesResponse) -> serde_json::Value {
    let content: String = resp
        .content
        .iter()
        .filter_map(|b| b.text.as_deref())
        .collect::<Vec<_>>()
        .join("");

    let finish_reason = match resp.stop_reason.as_deref() {
        Some("max_tokens") => "length",
        _ => "stop",
    };

    serde_json::json!({
        "id": resp.id,
        "object": "chat.completion",
        "model": resp.model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": resp.usage.input_tokens,
            "completion_tokens": resp.usage.output_tokens,
            "total_tokens": resp.usage.input_tokens + resp.usage.output_tokens,
        },
    })
}

// Anthropic API response types (deserialization only)

#[derive(Deserialize)]
struct MessagesResponse {
    id: String,
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_lift_into_system_field() {
        let body = serde_json::json!({
            "model": "claude-sonnet-4-5",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
            ],
            "temperature": 0.3,
        });
        let out = to_messages_body(&body);
        assert_eq!(out["system"], "be brief");
        assert_eq!(out["messages"].as_array().unwrap().len(), 1);
        assert_eq!(out["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(out["temperature"], 0.3);
    }

    #[test]
    fn response_maps_to_openai_shape() {
        let resp = MessagesResponse {
            id: "msg_1".into(),
            model: "claude-sonnet-4-5".into(),
            content: vec![ContentBlock {
                text: Some("hello".into()),
            }],
            stop_reason: Some("end_turn".into()),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        };
        let out = to_openai_response(resp);
        assert_eq!(out["choices"][0]["message"]["content"], "hello");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["usage"]["total_tokens"], 15);
    }
}
