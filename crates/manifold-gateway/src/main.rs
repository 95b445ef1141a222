use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use manifold_agent::{EngineContext, PatternLibrary, ToolGatewayClient};
use manifold_bus::EventBus;
use manifold_cache::ResponseCache;
use manifold_core::config::{ConfigHandle, GatewayConfig};
use manifold_keys::{loader::load_keys_dir, pool::KeyPool, sweep::spawn_sweep};
use manifold_providers::AdapterRegistry;
use manifold_queue::TaskQueue;
use manifold_gateway::app;
use manifold_router::Router;

/// Exit code the supervisor treats as "restart me".
const RESTART_EXIT_CODE: i32 = 3;

#[derive(Parser)]
#[command(name = "manifold-gateway", about = "Manifold AI-provider gateway")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "manifold.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manifold_gateway=info,manifold_agent=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();

    let config = GatewayConfig::load(Some(&args.config)).unwrap_or_else(|e| {
        warn!("config load failed ({}), using defaults", e);
        GatewayConfig::default()
    });

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let shutdown = CancellationToken::new();

    // credential pool, seeded from the flat key files
    let pool = Arc::new(KeyPool::new(
        config.key_management_settings.enable_quarantine,
        Duration::from_secs(config.key_management_settings.quarantine_secs),
    ));
    for (provider, secrets) in load_keys_dir(Path::new(&config.keys_dir))? {
        pool.seed(&provider, secrets);
    }
    let sweep_handle = spawn_sweep(
        pool.clone(),
        Duration::from_secs(config.key_management_settings.sweep_interval_secs),
        shutdown.clone(),
    );

    // one HTTP client for all upstream calls, with the per-request timeout
    let upstream_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.agent_settings.llm_timeout_secs))
        .build()?;

    let cache = Arc::new(ResponseCache::new(config.cache_settings.key_prefix.clone()));
    let router = Arc::new(Router::new(
        pool.clone(),
        AdapterRegistry::new(upstream_client.clone()),
        cache,
    ));

    let bus = Arc::new(EventBus::new());
    let queue = Arc::new(TaskQueue::open(Path::new(&config.queue_path))?);
    let patterns = Arc::new(PatternLibrary::load(Path::new(&config.prompts_dir)));

    let tool_client = ToolGatewayClient::new(
        upstream_client,
        config.agent_settings.mcp_server_url.clone(),
        Duration::from_secs(config.agent_settings.tool_timeout_secs),
    );

    let config_handle = Arc::new(ConfigHandle::new(config));

    let engine_ctx = Arc::new(EngineContext {
        config: config_handle.clone(),
        llm: router.clone(),
        tools: Arc::new(tool_client),
        bus: bus.clone(),
        queue: queue.clone(),
        patterns: patterns.clone(),
    });
    let worker_handles = manifold_agent::spawn_workers(engine_ctx, shutdown.clone());

    let state = Arc::new(app::AppState {
        config: config_handle,
        config_path: args.config,
        router,
        bus,
        queue,
        patterns,
        pool,
        shutdown: shutdown.clone(),
        restart_requested: AtomicBool::new(false),
    });
    let axum_router = app::build_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("manifold gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_shutdown = shutdown.clone();
    axum::serve(listener, axum_router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = serve_shutdown.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        })
        .await?;

    // stop the workers and the quarantine sweep before exiting
    shutdown.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }
    if let Some(handle) = sweep_handle {
        let _ = handle.await;
    }

    if state.restart_requested.load(Ordering::SeqCst) {
        info!("exiting with restart code");
        std::process::exit(RESTART_EXIT_CODE);
    }

    Ok(())
}
