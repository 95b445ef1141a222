use serde::{Deserialize, Serialize};

/// One reasoning session waiting for (or held by) a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTask {
    pub session_id: String,
    pub alias: String,
    pub user_query: String,
    /// Pattern override requested by the client, if any.
    pub reasoning_mode: Option<String>,
    pub client_system_instruction: Option<String>,
    #[serde(default)]
    pub client_manifests: Vec<String>,
    #[serde(default)]
    pub safety_flags: Vec<String>,
    /// RFC-3339 enqueue timestamp.
    pub enqueued_at: String,
    /// Trace identifier injected on enqueue and re-attached to the
    /// worker's span on claim, so producer and consumer correlate.
    pub trace_id: String,
}
