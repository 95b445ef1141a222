//! Adapter registry — maps a provider tag from the configuration to the
//! adapter that speaks its wire format. Most tags resolve to the generic
//! OpenAI-compatible adapter with a well-known base URL; Anthropic and
//! Gemini get native adapters.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::ProviderAdapter;
use crate::anthropic::AnthropicAdapter;
use crate::gemini::GeminiAdapter;
use crate::openai::OpenAiAdapter;

/// A well-known OpenAI-compatible provider endpoint.
pub struct KnownProvider {
    /// Tag used in config (`provider:` field and credential file name).
    pub tag: &'static str,
    /// Base URL without trailing slash.
    pub base_url: &'static str,
    /// Path appended to base_url for chat completions.
    pub chat_path: &'static str,
}

pub const KNOWN_PROVIDERS: &[KnownProvider] = &[
    KnownProvider {
        tag: "openai",
        base_url: "https://api.openai.com",
        chat_path: "/v1/chat/completions",
    },
    KnownProvider {
        tag: "groq",
        base_url: "https://api.groq.com/openai",
        chat_path: "/v1/chat/completions",
    },
    KnownProvider {
        tag: "deepseek",
        base_url: "https://api.deepseek.com",
        chat_path: "/v1/chat/completions",
    },
    KnownProvider {
        tag: "openrouter",
        base_url: "https://openrouter.ai/api",
        chat_path: "/v1/chat/completions",
    },
    KnownProvider {
        tag: "xai",
        base_url: "https://api.x.ai",
        chat_path: "/v1/chat/completions",
    },
    KnownProvider {
        tag: "mistral",
        base_url: "https://api.mistral.ai",
        chat_path: "/v1/chat/completions",
    },
    KnownProvider {
        tag: "together",
        base_url: "https://api.together.xyz",
        chat_path: "/v1/chat/completions",
    },
    KnownProvider {
        tag: "fireworks",
        base_url: "https://api.fireworks.ai/inference",
        chat_path: "/v1/chat/completions",
    },
];

/// Registry of adapters keyed by provider tag.
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn ProviderAdapter>>,
    /// Shared client for adapters minted on the fly for custom tags.
    client: reqwest::Client,
}

impl AdapterRegistry {
    /// Build the default registry: native Anthropic and Gemini adapters
    /// plus one OpenAI-compatible adapter per known provider.
    pub fn new(client: reqwest::Client) -> Self {
        let mut adapters: HashMap<&'static str, Arc<dyn ProviderAdapter>> = HashMap::new();

        adapters.insert(
            "anthropic",
            Arc::new(AnthropicAdapter::new(client.clone())),
        );
        adapters.insert("gemini", Arc::new(GeminiAdapter::new(client.clone())));
        for known in KNOWN_PROVIDERS {
            adapters.insert(
                known.tag,
                Arc::new(OpenAiAdapter::compatible(
                    client.clone(),
                    known.tag,
                    known.base_url,
                    known.chat_path,
                )),
            );
        }

        Self { adapters, client }
    }

    /// Resolve the adapter for a provider tag. Unknown tags get a generic
    /// OpenAI-compatible adapter when the profile supplies an `api_base`;
    /// without one there is nothing to call and resolution fails.
    pub fn resolve(
        &self,
        tag: &str,
        api_base: Option<&str>,
    ) -> Option<Arc<dyn ProviderAdapter>> {
        if let Some(adapter) = self.adapters.get(tag) {
            return Some(adapter.clone());
        }
        api_base.map(|base| {
            Arc::new(OpenAiAdapter::compatible(
                self.client.clone(),
                tag.to_string(),
                base.to_string(),
                "/v1/chat/completions",
            )) as Arc<dyn ProviderAdapter>
        })
    }
}
