use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8600;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TOOL_SERVER_URL: &str = "http://127.0.0.1:8601";

/// Top-level config (manifold.yaml + MANIFOLD_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model_list: Vec<ModelEntry>,
    #[serde(default)]
    pub router_settings: RouterSettings,
    #[serde(default)]
    pub agent_settings: AgentSettings,
    #[serde(default)]
    pub cache_settings: CacheSettings,
    #[serde(default)]
    pub key_management_settings: KeyManagementSettings,
    #[serde(default)]
    pub streaming_settings: StreamingSettings,
    /// Directory holding `keys_pool_<provider>.env` credential files.
    #[serde(default = "default_keys_dir")]
    pub keys_dir: String,
    /// Base directory for prompt/manifest files and reasoning patterns.
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: String,
    /// SQLite file backing the reasoning task queue.
    #[serde(default = "default_queue_path")]
    pub queue_path: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model_list: Vec::new(),
            router_settings: RouterSettings::default(),
            agent_settings: AgentSettings::default(),
            cache_settings: CacheSettings::default(),
            key_management_settings: KeyManagementSettings::default(),
            streaming_settings: StreamingSettings::default(),
            keys_dir: default_keys_dir(),
            prompts_dir: default_prompts_dir(),
            queue_path: default_queue_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// One provider profile: a concrete way to call one upstream model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Profile id — referenced by alias chains. Unique across the config.
    pub model_name: String,
    /// Provider tag — selects the adapter and the credential file.
    pub provider: String,
    pub model_params: ModelParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Upstream model name sent to the provider.
    pub model: String,
    /// Override for the provider's base URL (no trailing slash).
    pub api_base: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    /// Present only on agent-enabled profiles.
    pub agent_settings: Option<ProfileAgentSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileAgentSettings {
    pub reasoning_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterSettings {
    /// alias → ordered, non-empty list of profile ids (the priority chain).
    #[serde(default)]
    pub model_group_alias: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Base URL of the tool gateway.
    #[serde(default = "default_tool_server_url")]
    pub mcp_server_url: String,
    /// Global default reasoning pattern; profiles may override.
    pub reasoning_mode: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_sse_read_timeout")]
    pub sse_read_timeout_secs: u64,
    /// Server-side instruction appended at the lowest priority tier.
    pub server_system_instruction: Option<String>,
    /// Manifest files (relative to `prompts_dir`) appended after it.
    #[serde(default)]
    pub server_manifests: Vec<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            mcp_server_url: default_tool_server_url(),
            reasoning_mode: None,
            worker_count: default_worker_count(),
            max_steps: default_max_steps(),
            llm_timeout_secs: default_llm_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            sse_read_timeout_secs: default_sse_read_timeout(),
            server_system_instruction: None,
            server_manifests: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub rules: Vec<CacheRule>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            key_prefix: default_cache_prefix(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRule {
    /// Profile ids this rule applies to.
    pub model_names: Vec<String>,
    /// Request body fields folded into the fingerprint.
    pub include_in_key: Vec<String>,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyManagementSettings {
    #[serde(default = "bool_true")]
    pub enable_quarantine: bool,
    #[serde(default = "default_quarantine_secs")]
    pub quarantine_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for KeyManagementSettings {
    fn default() -> Self {
        Self {
            enable_quarantine: true,
            quarantine_secs: default_quarantine_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TypewriterMode {
    /// Gateway re-chunks thought/answer text character by character.
    #[default]
    Proxy,
    /// Deltas are forwarded as received; the client animates.
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamingSettings {
    #[serde(default)]
    pub typewriter_mode: TypewriterMode,
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tool_server_url() -> String {
    DEFAULT_TOOL_SERVER_URL.to_string()
}
fn default_worker_count() -> usize {
    4
}
fn default_max_steps() -> u32 {
    12
}
fn default_llm_timeout() -> u64 {
    300
}
fn default_tool_timeout() -> u64 {
    300
}
fn default_sse_read_timeout() -> u64 {
    60
}
fn default_cache_prefix() -> String {
    "manifold:".to_string()
}
fn default_quarantine_secs() -> u64 {
    60
}
fn default_sweep_interval_secs() -> u64 {
    10
}
fn default_keys_dir() -> String {
    "keys_pool".to_string()
}
fn default_prompts_dir() -> String {
    "prompts".to_string()
}
fn default_queue_path() -> String {
    "manifold-queue.db".to_string()
}

impl GatewayConfig {
    /// Load config from a YAML file with MANIFOLD_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("manifold.yaml");

        let config: GatewayConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("MANIFOLD_").split("__"))
            .extract()
            .map_err(|e| crate::error::GatewayError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a raw YAML document (admin reload path).
    pub fn from_yaml(raw: &str) -> crate::error::Result<Self> {
        let config: GatewayConfig = Figment::new()
            .merge(Yaml::string(raw))
            .extract()
            .map_err(|e| crate::error::GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs the router could not serve: duplicate profile ids,
    /// empty alias chains, chains referencing unknown profiles.
    pub fn validate(&self) -> crate::error::Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.model_list {
            if !seen.insert(entry.model_name.as_str()) {
                return Err(crate::error::GatewayError::Config(format!(
                    "duplicate profile id '{}' in model_list",
                    entry.model_name
                )));
            }
        }

        for (alias, chain) in &self.router_settings.model_group_alias {
            if chain.is_empty() {
                return Err(crate::error::GatewayError::Config(format!(
                    "alias '{alias}' has an empty priority chain"
                )));
            }
            for profile_id in chain {
                if !seen.contains(profile_id.as_str()) {
                    return Err(crate::error::GatewayError::Config(format!(
                        "alias '{alias}' references unknown profile '{profile_id}'"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Look up a profile by id.
    pub fn profile(&self, profile_id: &str) -> Option<&ModelEntry> {
        self.model_list.iter().find(|m| m.model_name == profile_id)
    }

    /// The priority chain for an alias, if configured.
    pub fn chain(&self, alias: &str) -> Option<&[String]> {
        self.router_settings
            .model_group_alias
            .get(alias)
            .map(|v| v.as_slice())
    }

    /// True when any profile in the alias chain carries agent settings.
    pub fn is_agent_alias(&self, alias: &str) -> bool {
        self.chain(alias)
            .map(|chain| {
                chain.iter().any(|id| {
                    self.profile(id)
                        .map(|p| p.model_params.agent_settings.is_some())
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    /// The reasoning pattern for an alias: first profile override in the
    /// chain, else the global default.
    pub fn reasoning_mode(&self, alias: &str) -> Option<String> {
        if let Some(chain) = self.chain(alias) {
            for id in chain {
                if let Some(agent) = self
                    .profile(id)
                    .and_then(|p| p.model_params.agent_settings.as_ref())
                {
                    return Some(agent.reasoning_mode.clone());
                }
            }
        }
        self.agent_settings.reasoning_mode.clone()
    }

    /// UI-only provider → upstream model names mapping for the admin panel.
    pub fn provider_models(&self) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for entry in &self.model_list {
            map.entry(entry.provider.clone())
                .or_default()
                .push(entry.model_params.model.clone());
        }
        map
    }

    /// The cache rule covering a profile, if any.
    pub fn cache_rule(&self, profile_id: &str) -> Option<&CacheRule> {
        if !self.cache_settings.enabled {
            return None;
        }
        self.cache_settings
            .rules
            .iter()
            .find(|r| r.model_names.iter().any(|m| m == profile_id))
    }
}

/// Process-wide configuration holder. Reloads replace the inner Arc
/// atomically; in-flight requests keep the snapshot they started with.
pub struct ConfigHandle {
    inner: RwLock<Arc<GatewayConfig>>,
}

impl ConfigHandle {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// Current snapshot. Callers hold the Arc for the whole request.
    pub fn current(&self) -> Arc<GatewayConfig> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swap in a new config (admin reload).
    pub fn replace(&self, config: GatewayConfig) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(config);
        tracing::info!("configuration reloaded");
    }
}
