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

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiAdapter {
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn url(&self, req: &UpstreamRequest, model: &str, verb: &str) -> String {
        let base = req.api_base.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{base}/v1beta/models/{model}:{verb}")
    }

    async fn post(
        &self,
        url: &str,
        cred: &Credential,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, AdapterError> {
        debug!(provider = "gemini", "sending upstream request");

        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &cred.secret)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(provider = "gemini", status, body = %text, "upstream API error");
            return Err(AdapterError::Api { status, body: text });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn tag(&self) -> &str {
        "gemini"
    }

    async fn call(
        &self,
        req: &UpstreamRequest,
        cred: &Credential,
    ) -> Result<UpstreamResponse, AdapterError> {
        let model = model_of(&req.body);
        match req.kind {
            RequestKind::Chat => {
                let body = to_generate_body(&req.body);
                let url = self.url(req, &model, "generateContent");
                let resp = self.post(&url, cred, &body).await?;
                let api_resp: GenerateResponse = resp
                    .json()
                    .await
                    .map_err(|e| AdapterError::Parse(e.to_string()))?;
                Ok(UpstreamResponse::json(to_openai_response(&model, api_resp)))
            }
            RequestKind::Embeddings => {
                let body = to_embed_body(&model, &req.body);
                let url = self.url(req, &model, "batchEmbedContents");
                let resp = self.post(&url, cred, &body).await?;
                let api_resp: BatchEmbedResponse = resp
                    .json()
                    .await
                    .map_err(|e| AdapterError::Parse(e.to_string()))?;
                Ok(UpstreamResponse::json(to_openai_embeddings(
                    &model, api_resp,
                )))
            }
            RequestKind::Speech => Err(AdapterError::Unsupported {
                provider: "gemini".to_string(),
                kind: req.kind,
            }),
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
                provider: "gemini".to_string(),
                kind: req.kind,
            });
        }

        let model = model_of(&req.body);
        let body = to_generate_body(&req.body);
        let url = format!(
            "{}?alt=sse",
            self.url(req, &model, "streamGenerateContent")
        );
        let resp = self.post(&url, cred, &body).await?;

        pump_sse_lines(resp, &tx, |line| {
            let Some(SseParsed::Data(data)) = parse_sse_line(line) else {
                return ControlFlow::Continue(Vec::new());
            };
            let mut out = Vec::new();
            if let Ok(chunk) = serde_json::from_str::<GenerateResponse>(&data) {
                let text = candidate_text(&chunk);
                if !text.is_empty() {
                    out.push(StreamDelta::Text { text });
                }
            }
            ControlFlow::Continue(out)
        })
        .await;

        let _ = tx.send(StreamDelta::Done).await;
        Ok(())
    }
}

fn model_of(body: &serde_json::Value) -> String {
    body.get("model")
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string()
}

/// OpenAI chat body → Gemini generateContent body. System messages become
/// `systemInstruction`; assistant turns use the "model" role.
fn to_generate_body(openai_body: &serde_json::Value) -> serde_json::Value {
    let empty = Vec::new();
    let in_messages = openai_body
        .get("messages")
        .and_then(|m| m.as_array())
        .unwrap_or(&empty);

    let mut system_parts: Vec<serde_json::Value> = Vec::new();
    let mut contents: Vec<serde_json::Value> = Vec::new();

    for msg in in_messages {
        let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("user");
        let text = msg.get("content").and_then(|c| c.as_str()).unwrap_or("");
        match role {
            "system" => system_parts.push(serde_json::json!({ "text": text })),
            "assistant" => contents.push(serde_json::json!({
                "role": "model",
                "parts": [{ "text": text }],
            })),
            _ => contents.push(serde_json::json!({
                "role": "user",
                "parts": [{ "text": text }],
            })),
        }
    }

    let mut body = serde_json::json!({ "contents": contents });
    if !system_parts.is_empty() {
        body["systemInstruction"] = serde_json::json!({ "parts": system_parts });
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(v) = openai_body.get("temperature") {
        generation_config.insert("temperature".to_string(), v.clone());
    }
    if let Some(v) = openai_body.get("max_tokens") {
        generation_config.insert("maxOutputTokens".to_string(), v.clone());
    }
    if let Some(v) = openai_body.get("top_p") {
        generation_config.insert("topP".to_string(), v.clone());
    }
    if !generation_config.is_empty() {
        body["generationConfig"] = serde_json::Value::Object(generation_config);
    }

    body
}

fn to_embed_body(model: &str, openai_body: &serde_json::Value) -> serde_json::Value {
    let inputs: Vec<String> = match openai_body.get("input") {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    };

    let requests: Vec<serde_json::Value> = inputs
        .iter()
        .map(|text| {
            serde_json::json!({
                "model": format!("models/{model}"),
                "content": { "parts": [{ "text": text }] },
            })
        })
        .collect();

    serde_json::json!({ "requests": requests })
}

fn candidate_text(resp: &GenerateResponse) -> String {
    resp.candidates
        .first()
        .map(|c| {
            c.content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn to_openai_response(model: &str, resp: GenerateResponse) -> serde_json::Value {
    let finish_reason = match resp
        .candidates
        .first()
        .and_then(|c| c.finish_reason.as_deref())
    {
        Some("MAX_TOKENS") => "length",
        _ => "stop",
    };
    let content = candidate_text(&resp);
    let usage = resp.usage_metadata.unwrap_or_default();

    serde_json::json!({
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": usage.prompt_token_count,
            "completion_tokens": usage.candidates_token_count,
            "total_tokens": usage.prompt_token_count + usage.candidates_token_count,
        },
    })
}

fn to_openai_embeddings(model: &str, resp: BatchEmbedResponse) -> serde_json::Value {
    let data: Vec<serde_json::Value> = resp
        .embeddings
        .into_iter()
        .enumerate()
        .map(|(index, e)| {
            serde_json::json!({
                "object": "embedding",
                "index": index,
                "embedding": e.values,
            })
        })
        .collect();

    serde_json::json!({
        "object": "list",
        "model": model,
        "data": data,
    })
}

// Gemini API response types (deserialization only)

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Embedding>,
}

#[derive(Deserialize)]
struct Embedding {
    #[serde(default)]
    values: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_maps_roles_and_generation_config() {
        let body = serde_json::json!({
            "model": "gemini-2.0-flash",
            "messages": [
                {"role": "system", "content": "short answers"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ],
            "max_tokens": 128,
        });
        let out = to_generate_body(&body);
        assert_eq!(out["contents"].as_array().unwrap().len(), 2);
        assert_eq!(out["contents"][1]["role"], "model");
        assert_eq!(out["systemInstruction"]["parts"][0]["text"], "short answers");
        assert_eq!(out["generationConfig"]["maxOutputTokens"], 128);
    }

    #[test]
    fn embeddings_accept_string_or_array_input() {
        let single = to_embed_body("embed-1", &serde_json::json!({"input": "hello"}));
        assert_eq!(single["requests"].as_array().unwrap().len(), 1);

        let multi = to_embed_body("embed-1", &serde_json::json!({"input": ["a", "b"]}));
        assert_eq!(multi["requests"].as_array().unwrap().len(), 2);
    }
}
