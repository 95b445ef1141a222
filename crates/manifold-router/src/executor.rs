use std::sync::Arc;

use manifold_keys::KeyPool;
use manifold_providers::{AdapterError, ProviderAdapter, StreamDelta, UpstreamRequest, UpstreamResponse};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ExecuteError;

/// Body substrings that mark a credential as permanently dead.
const PERMANENT_MARKERS: &[&str] = &[
    "invalid api key",
    "api key not valid",
    "api key expired",
    "account deactivated",
];

/// Body substrings that mark the request itself as the problem.
const REQUEST_CONTENT_MARKERS: &[&str] = &[
    "context length",
    "context_length_exceeded",
    "string too long",
    "invalid request body",
    "unsupported content",
    "safety",
    "blocked",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    /// Retire the credential and rotate to the next one.
    Permanent,
    /// Quarantine the credential and rotate to the next one.
    Transient,
    /// Surface to the caller; no credential is at fault.
    RequestContent,
}

/// Classify an upstream HTTP failure. Request-content markers win over
/// everything (a 403 safety block is not a key problem); then 400 means
/// bad request, 401/403 and permanent markers kill the key, and the rest
/// (429, 5xx, odd 4xx) is treated as transient.
fn classify(status: u16, body: &str) -> FailureClass {
    let lower = body.to_lowercase();
    if REQUEST_CONTENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureClass::RequestContent;
    }
    if status == 400 {
        return FailureClass::RequestContent;
    }
    if status == 401 || status == 403 || PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureClass::Permanent;
    }
    FailureClass::Transient
}

/// Runs a single request against a single provider profile, rotating
/// through that provider's credential pool until one key works or the
/// pool is exhausted.
pub struct KeyRotationExecutor {
    pool: Arc<KeyPool>,
}

impl KeyRotationExecutor {
    pub fn new(pool: Arc<KeyPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    pub async fn execute(
        &self,
        adapter: &dyn ProviderAdapter,
        provider: &str,
        req: &UpstreamRequest,
    ) -> Result<UpstreamResponse, ExecuteError> {
        // +1 covers a credential restored by the sweep mid-loop
        let bound = self.pool.available_count(provider) + 1;

        for attempt in 0..bound {
            let Some(cred) = self.pool.acquire(provider) else {
                break;
            };

            match adapter.call(req, &cred).await {
                Ok(resp) => {
                    self.pool.release(provider, &cred);
                    if attempt > 0 {
                        info!(provider, attempt, "request succeeded after key rotation");
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    if let Some(surfaced) = self.handle_failure(provider, &cred, e) {
                        return Err(surfaced);
                    }
                }
            }
        }

        warn!(provider, "credential pool exhausted");
        Err(ExecuteError::ProviderExhausted {
            provider: provider.to_string(),
        })
    }

    /// Streaming twin of `execute`. Adapters fail before the first delta
    /// when the upstream rejects the call, so rotation still applies; once
    /// deltas flow, failures surface on the delta channel instead.
    pub async fn execute_stream(
        &self,
        adapter: &dyn ProviderAdapter,
        provider: &str,
        req: &UpstreamRequest,
        tx: mpsc::Sender<StreamDelta>,
    ) -> Result<(), ExecuteError> {
        let bound = self.pool.available_count(provider) + 1;

        for attempt in 0..bound {
            let Some(cred) = self.pool.acquire(provider) else {
                break;
            };

            match adapter.call_stream(req, &cred, tx.clone()).await {
                Ok(()) => {
                    self.pool.release(provider, &cred);
                    if attempt > 0 {
                        info!(provider, attempt, "stream succeeded after key rotation");
                    }
                    return Ok(());
                }
                Err(e) => {
                    if let Some(surfaced) = self.handle_failure(provider, &cred, e) {
                        return Err(surfaced);
                    }
                }
            }
        }

        warn!(provider, "credential pool exhausted");
        Err(ExecuteError::ProviderExhausted {
            provider: provider.to_string(),
        })
    }

    /// Apply the pool transition for one failed attempt. Returns an error
    /// to surface immediately, or `None` to rotate to the next credential.
    fn handle_failure(
        &self,
        provider: &str,
        cred: &manifold_keys::Credential,
        err: AdapterError,
    ) -> Option<ExecuteError> {
        match err {
            AdapterError::Network(detail) => {
                debug!(provider, %detail, "network failure, quarantining credential");
                self.pool.quarantine(provider, cred, "network");
                None
            }
            AdapterError::Api { status, body } => match classify(status, &body) {
                FailureClass::RequestContent => {
                    self.pool.release(provider, cred);
                    Some(ExecuteError::RequestContent { status, body })
                }
                FailureClass::Permanent => {
                    self.pool.retire(provider, cred, &status.to_string());
                    None
                }
                FailureClass::Transient => {
                    self.pool.quarantine(provider, cred, &status.to_string());
                    None
                }
            },
            AdapterError::Parse(detail) => {
                self.pool.release(provider, cred);
                Some(ExecuteError::Malformed {
                    provider: provider.to_string(),
                    detail,
                })
            }
            AdapterError::Unsupported { .. } => {
                self.pool.release(provider, cred);
                Some(ExecuteError::Unsupported {
                    provider: provider.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use manifold_keys::Credential;
    use manifold_providers::{RequestKind, UpstreamResponse};
    use std::collections::HashMap;
    use std::time::Duration;

    /// Scripted adapter: maps credential secret → outcome.
    struct Scripted {
        outcomes: HashMap<String, Result<serde_json::Value, (u16, String)>>,
    }

    #[async_trait]
    impl ProviderAdapter for Scripted {
        fn tag(&self) -> &str {
            "scripted"
        }

        async fn call(
            &self,
            _req: &UpstreamRequest,
            cred: &Credential,
        ) -> Result<UpstreamResponse, AdapterError> {
            match self.outcomes.get(&cred.secret) {
                Some(Ok(body)) => Ok(UpstreamResponse::json(body.clone())),
                Some(Err((status, body))) => Err(AdapterError::Api {
                    status: *status,
                    body: body.clone(),
                }),
                None => Err(AdapterError::Network("no route".to_string())),
            }
        }
    }

    fn request() -> UpstreamRequest {
        UpstreamRequest {
            kind: RequestKind::Chat,
            body: serde_json::json!({"model": "m", "messages": []}),
            api_base: None,
        }
    }

    fn pool_with(keys: &[&str]) -> Arc<KeyPool> {
        let pool = Arc::new(KeyPool::new(true, Duration::from_secs(60)));
        pool.seed("scripted", keys.iter().map(|s| s.to_string()));
        pool
    }

    #[tokio::test]
    async fn success_returns_credential_to_rotation() {
        let pool = pool_with(&["k1"]);
        let adapter = Scripted {
            outcomes: HashMap::from([("k1".to_string(), Ok(serde_json::json!({"ok": 1})))]),
        };
        let exec = KeyRotationExecutor::new(pool.clone());

        let resp = exec.execute(&adapter, "scripted", &request()).await.unwrap();
        assert_eq!(resp.as_json().unwrap()["ok"], 1);
        assert_eq!(pool.snapshot()["scripted"].available, 1);
    }

    #[tokio::test]
    async fn unauthorized_retires_then_next_key_succeeds() {
        let pool = pool_with(&["k1", "k2"]);
        let adapter = Scripted {
            outcomes: HashMap::from([
                ("k1".to_string(), Err((401, "unauthorized".to_string()))),
                ("k2".to_string(), Ok(serde_json::json!({"ok": 2}))),
            ]),
        };
        let exec = KeyRotationExecutor::new(pool.clone());

        let resp = exec.execute(&adapter, "scripted", &request()).await.unwrap();
        assert_eq!(resp.as_json().unwrap()["ok"], 2);

        let counts = pool.snapshot()["scripted"];
        assert_eq!(counts.retired, 1);
        assert_eq!(counts.available, 1);
    }

    #[tokio::test]
    async fn rate_limits_quarantine_every_key_then_exhaust() {
        let pool = pool_with(&["k1", "k2"]);
        let adapter = Scripted {
            outcomes: HashMap::from([
                ("k1".to_string(), Err((429, "rate limit".to_string()))),
                ("k2".to_string(), Err((429, "rate limit".to_string()))),
            ]),
        };
        let exec = KeyRotationExecutor::new(pool.clone());

        let err = exec.execute(&adapter, "scripted", &request()).await.unwrap_err();
        assert!(matches!(err, ExecuteError::ProviderExhausted { .. }));

        let counts = pool.snapshot()["scripted"];
        assert_eq!(counts.quarantined, 2);
        assert_eq!(counts.available, 0);
    }

    #[tokio::test]
    async fn bad_request_surfaces_without_rotation() {
        let pool = pool_with(&["k1", "k2"]);
        let adapter = Scripted {
            outcomes: HashMap::from([
                ("k1".to_string(), Err((400, "invalid request body".to_string()))),
            ]),
        };
        let exec = KeyRotationExecutor::new(pool.clone());

        let err = exec.execute(&adapter, "scripted", &request()).await.unwrap_err();
        assert!(matches!(err, ExecuteError::RequestContent { status: 400, .. }));
        // the key was innocent: both stay available
        assert_eq!(pool.snapshot()["scripted"].available, 2);
    }

    #[tokio::test]
    async fn network_failures_quarantine_and_rotate() {
        let pool = pool_with(&["dead", "k2"]);
        let adapter = Scripted {
            outcomes: HashMap::from([("k2".to_string(), Ok(serde_json::json!({"ok": 1})))]),
        };
        let exec = KeyRotationExecutor::new(pool.clone());

        let resp = exec.execute(&adapter, "scripted", &request()).await.unwrap();
        assert!(resp.as_json().is_some());

        let counts = pool.snapshot()["scripted"];
        assert_eq!(counts.quarantined, 1);
        assert_eq!(counts.available, 1);
    }

    #[tokio::test]
    async fn empty_pool_exhausts_immediately() {
        let pool = Arc::new(KeyPool::new(true, Duration::from_secs(60)));
        let adapter = Scripted {
            outcomes: HashMap::new(),
        };
        let exec = KeyRotationExecutor::new(pool);
        let err = exec.execute(&adapter, "scripted", &request()).await.unwrap_err();
        assert!(matches!(err, ExecuteError::ProviderExhausted { .. }));
    }

    #[test]
    fn safety_block_with_403_is_request_content() {
        assert_eq!(
            classify(403, "request blocked by safety filter"),
            FailureClass::RequestContent
        );
        assert_eq!(classify(403, "forbidden"), FailureClass::Permanent);
    }

    #[test]
    fn marker_matching_is_case_insensitive() {
        assert_eq!(classify(500, "Invalid API Key provided"), FailureClass::Permanent);
        assert_eq!(classify(422, "Context Length exceeded"), FailureClass::RequestContent);
        assert_eq!(classify(503, "overloaded"), FailureClass::Transient);
        assert_eq!(classify(429, ""), FailureClass::Transient);
    }
}
