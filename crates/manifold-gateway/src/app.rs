use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router as AxumRouter,
};
use manifold_agent::PatternLibrary;
use manifold_bus::EventBus;
use manifold_core::config::ConfigHandle;
use manifold_keys::KeyPool;
use manifold_queue::TaskQueue;
use manifold_router::Router;
use tokio_util::sync::CancellationToken;

/// Central shared state — passed as Arc<AppState> to all axum handlers.
pub struct AppState {
    pub config: Arc<ConfigHandle>,
    /// Where the active YAML config lives on disk (admin write-back).
    pub config_path: String,
    pub router: Arc<Router>,
    pub bus: Arc<EventBus>,
    pub queue: Arc<TaskQueue>,
    pub patterns: Arc<PatternLibrary>,
    pub pool: Arc<KeyPool>,
    /// Fires on shutdown; the admin restart endpoint cancels it too.
    pub shutdown: CancellationToken,
    /// Set before `shutdown` is cancelled by `/admin/restart` so main can
    /// exit with the restart code the supervisor watches for.
    pub restart_requested: AtomicBool,
}

/// Assemble the full axum router: client API plus admin API.
pub fn build_router(state: Arc<AppState>) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/v1/chat/completions",
            post(crate::http::completions::chat_completions),
        )
        .route("/v1/embeddings", post(crate::http::completions::embeddings))
        .route("/v1/audio/speech", post(crate::http::completions::speech))
        .route("/v1/react/sessions", post(crate::http::react::create_session))
        .route(
            "/v1/models/all-runnable",
            get(crate::http::models::all_runnable),
        )
        .route(
            "/admin/config",
            get(crate::http::admin::get_config).post(crate::http::admin::post_config),
        )
        .route(
            "/admin/prompt_content",
            get(crate::http::admin::get_prompt_content)
                .post(crate::http::admin::post_prompt_content),
        )
        .route("/admin/prompts", get(crate::http::admin::list_prompts))
        .route(
            "/admin/react_patterns",
            get(crate::http::admin::list_react_patterns),
        )
        .route(
            "/admin/provider_models",
            get(crate::http::admin::provider_models),
        )
        .route("/admin/key_pool", get(crate::http::admin::key_pool))
        .route("/admin/restart", post(crate::http::admin::restart))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
