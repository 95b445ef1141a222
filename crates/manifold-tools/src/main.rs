use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use manifold_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "manifold-tools", about = "Manifold tool gateway")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8601)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manifold_tools=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();

    let registry = Arc::new(ToolRegistry::with_builtins(reqwest::Client::new()));
    let router = manifold_tools::build_router(registry);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!("manifold tool gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
