use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::registry::{GatewayTool, ToolError, ToolParam};

const SEARCH_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
/// Environment variable holding the search API key. Lives only in the
/// tool-server process.
const API_KEY_ENV: &str = "MANIFOLD_SEARCH_API_KEY";
const DEFAULT_COUNT: usize = 5;

/// Web search backed by the Brave Search API.
pub struct WebSearch {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl WebSearch {
    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: std::env::var(API_KEY_ENV).ok(),
            endpoint: SEARCH_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(client: reqwest::Client, api_key: String, endpoint: String) -> Self {
        Self {
            client,
            api_key: Some(api_key),
            endpoint,
        }
    }
}

#[async_trait]
impl GatewayTool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn summary(&self) -> &str {
        "Search the web and return the top results with titles, URLs and snippets"
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam::required("query", "string", "The search query"),
            ToolParam::optional("count", "number", "How many results to return (default 5)"),
        ]
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::MissingArgument {
                name: "query".to_string(),
            })?;
        let count = args
            .get("count")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_COUNT as u64)
            .min(20) as usize;

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::Failed(format!("{API_KEY_ENV} is not set")))?;

        debug!(query, count, "running web search");

        let resp = self
            .client
            .get(&self.endpoint)
            .header("x-subscription-token", api_key)
            .query(&[("q", query), ("count", &count.to_string())])
            .send()
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ToolError::Failed(format!(
                "search upstream returned {status}: {body}"
            )));
        }

        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        let results: Vec<serde_json::Value> = parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .take(count)
            .map(|r| {
                serde_json::json!({
                    "title": r.title,
                    "url": r.url,
                    "snippet": r.description,
                })
            })
            .collect();

        Ok(serde_json::json!({ "query": query, "results": results }))
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    web: Option<WebResults>,
}

#[derive(Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_api_key_fails_cleanly() {
        let tool = WebSearch {
            client: reqwest::Client::new(),
            api_key: None,
            endpoint: SEARCH_ENDPOINT.to_string(),
        };
        let err = tool
            .invoke(serde_json::json!({"query": "capital of France"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
    }

    #[tokio::test]
    async fn missing_query_is_rejected() {
        let tool = WebSearch {
            client: reqwest::Client::new(),
            api_key: Some("k".to_string()),
            endpoint: SEARCH_ENDPOINT.to_string(),
        };
        let err = tool.invoke(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::MissingArgument { .. }));
    }
}
