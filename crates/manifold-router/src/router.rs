use std::sync::Arc;
use std::time::Duration;

use manifold_cache::{request_fingerprint, ResponseCache};
use manifold_core::config::{GatewayConfig, ModelEntry};
use manifold_keys::KeyPool;
use manifold_providers::{
    AdapterRegistry, RequestKind, ResponseBody, StreamDelta, UpstreamRequest,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{ExecuteError, RouteError};
use crate::executor::KeyRotationExecutor;

/// A client request entering the routing layer. `body` is the OpenAI-shaped
/// request as received; the router substitutes the upstream model name per
/// profile before handing it to an adapter.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub alias: String,
    pub kind: RequestKind,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub body: ResponseBody,
    /// Profile that served the request.
    pub profile_id: String,
    pub from_cache: bool,
}

/// Resolves an alias to its priority chain and tries each profile in
/// order, delegating per-profile credential rotation to the executor.
pub struct Router {
    executor: KeyRotationExecutor,
    registry: AdapterRegistry,
    cache: Arc<ResponseCache>,
}

impl Router {
    pub fn new(pool: Arc<KeyPool>, registry: AdapterRegistry, cache: Arc<ResponseCache>) -> Self {
        Self {
            executor: KeyRotationExecutor::new(pool),
            registry,
            cache,
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        self.executor.pool()
    }

    /// Route a unary request. Cache pre-flight applies per profile; a hit
    /// short-circuits the upstream call entirely.
    pub async fn route(
        &self,
        config: &GatewayConfig,
        req: &RouteRequest,
    ) -> Result<RoutedResponse, RouteError> {
        let chain = config.chain(&req.alias).ok_or(RouteError::AliasNotFound {
            alias: req.alias.clone(),
        })?;

        for profile_id in chain {
            let Some(profile) = config.profile(profile_id) else {
                warn!(%profile_id, "chain references unknown profile, skipping");
                continue;
            };

            let fingerprint = config.cache_rule(profile_id).map(|rule| {
                (
                    request_fingerprint(profile_id, &req.body, &rule.include_in_key),
                    Duration::from_secs(rule.ttl_seconds),
                )
            });

            if let Some((fp, _)) = &fingerprint {
                if let Some(cached) = self.cache.get(fp) {
                    let body: serde_json::Value = match serde_json::from_str(&cached) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    info!(%profile_id, "serving response from cache");
                    return Ok(RoutedResponse {
                        body: ResponseBody::Json(body),
                        profile_id: profile_id.clone(),
                        from_cache: true,
                    });
                }
            }

            let Some(adapter) = self
                .registry
                .resolve(&profile.provider, profile.model_params.api_base.as_deref())
            else {
                warn!(
                    provider = %profile.provider,
                    %profile_id,
                    "no adapter for provider, skipping profile"
                );
                continue;
            };

            let upstream = build_upstream_request(req, profile);

            match self
                .executor
                .execute(adapter.as_ref(), &profile.provider, &upstream)
                .await
            {
                Ok(resp) => {
                    if let (Some((fp, ttl)), ResponseBody::Json(json)) =
                        (&fingerprint, &resp.body)
                    {
                        if let Ok(serialized) = serde_json::to_string(json) {
                            let cache = self.cache.clone();
                            let fp = fp.clone();
                            let ttl = *ttl;
                            tokio::spawn(async move {
                                cache.put(&fp, serialized, ttl);
                            });
                        }
                    }
                    return Ok(RoutedResponse {
                        body: resp.body,
                        profile_id: profile_id.clone(),
                        from_cache: false,
                    });
                }
                Err(ExecuteError::RequestContent { status, body }) => {
                    return Err(RouteError::RequestContent { status, body });
                }
                Err(e) => {
                    info!(%profile_id, err = %e, "profile failed, trying next in chain");
                }
            }
        }

        Err(RouteError::NoProviderAvailable)
    }

    /// Route a streaming chat request. Deltas flow through `tx`; the same
    /// chain fallback applies because adapters fail before the first delta
    /// when the upstream rejects the call. Never cached.
    pub async fn route_stream(
        &self,
        config: &GatewayConfig,
        req: &RouteRequest,
        tx: mpsc::Sender<StreamDelta>,
    ) -> Result<String, RouteError> {
        let chain = config.chain(&req.alias).ok_or(RouteError::AliasNotFound {
            alias: req.alias.clone(),
        })?;

        for profile_id in chain {
            let Some(profile) = config.profile(profile_id) else {
                warn!(%profile_id, "chain references unknown profile, skipping");
                continue;
            };
            let Some(adapter) = self
                .registry
                .resolve(&profile.provider, profile.model_params.api_base.as_deref())
            else {
                warn!(
                    provider = %profile.provider,
                    %profile_id,
                    "no adapter for provider, skipping profile"
                );
                continue;
            };

            let upstream = build_upstream_request(req, profile);

            match self
                .executor
                .execute_stream(adapter.as_ref(), &profile.provider, &upstream, tx.clone())
                .await
            {
                Ok(()) => return Ok(profile_id.clone()),
                Err(ExecuteError::RequestContent { status, body }) => {
                    return Err(RouteError::RequestContent { status, body });
                }
                Err(e) => {
                    info!(%profile_id, err = %e, "profile failed, trying next in chain");
                }
            }
        }

        Err(RouteError::NoProviderAvailable)
    }
}

/// Substitute the upstream model name and fold the profile's generation
/// parameters into the body. Profile parameters win over client values so
/// a profile always calls its upstream the same way.
fn build_upstream_request(req: &RouteRequest, profile: &ModelEntry) -> UpstreamRequest {
    let mut body = req.body.clone();
    body["model"] = serde_json::Value::String(profile.model_params.model.clone());
    if let Some(t) = profile.model_params.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    if let Some(m) = profile.model_params.max_tokens {
        body["max_tokens"] = serde_json::json!(m);
    }
    if let Some(p) = profile.model_params.top_p {
        body["top_p"] = serde_json::json!(p);
    }

    UpstreamRequest {
        kind: req.kind,
        body,
        api_base: profile.model_params.api_base.clone(),
    }
}
