use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

/// Boundary to the tool gateway, abstracted so the engine can be driven
/// with a stub in tests.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Descriptor array from the gateway's metadata surface, serialized
    /// for the prompt. Empty string when the gateway is unreachable.
    async fn descriptors_json(&self) -> String;

    /// Invoke one tool. Never fails: HTTP and transport errors come back
    /// as a structured `{error, detail}` observation so the reasoning
    /// loop can continue with that context.
    async fn invoke(&self, tool_name: &str, arguments: &serde_json::Value) -> serde_json::Value;
}

/// HTTP client for the tool gateway.
pub struct ToolGatewayClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ToolGatewayClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            base_url,
            timeout,
        }
    }
}

#[async_trait]
impl ToolInvoker for ToolGatewayClient {
    async fn descriptors_json(&self) -> String {
        let url = format!("{}/tools", self.base_url);
        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "tool gateway listing failed");
                String::new()
            }
            Err(e) => {
                warn!(error = %e, "tool gateway unreachable");
                String::new()
            }
        }
    }

    async fn invoke(&self, tool_name: &str, arguments: &serde_json::Value) -> serde_json::Value {
        let url = format!("{}/tools/{}", self.base_url, tool_name);
        debug!(tool = tool_name, "invoking tool");

        let result = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("content-type", "application/json")
            .json(arguments)
            .send()
            .await;

        match result {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if (200..300).contains(&status) {
                    resp.json().await.unwrap_or_else(
                        |e| serde_json::json!({ "error": "parse", "detail": e.to_string() }),
                    )
                } else {
                    let detail = resp.text().await.unwrap_or_default();
                    warn!(tool = tool_name, status, "tool call failed");
                    serde_json::json!({ "error": status, "detail": detail })
                }
            }
            Err(e) => {
                warn!(tool = tool_name, error = %e, "tool call transport failure");
                serde_json::json!({ "error": "network", "detail": e.to_string() })
            }
        }
    }
}
