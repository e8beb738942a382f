use anyhow::{Context, Result};
use clap::Parser;
use guide_stream::{create_router, storage, AppState, Config, Upstreams};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "guide-stream", version, about = "Streaming audio guide server")]
struct Args {
    /// Config file path (extension optional)
    #[arg(short, long, default_value = "config/guide-stream")]
    config: String,

    /// Override the HTTP port from the config file
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    info!("Guide Stream v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let (store, objects) = storage::open(&cfg.storage).context("Failed to open storage")?;
    let upstreams = Upstreams::from_config(&cfg.upstream, &cfg.stream.audio_format)
        .context("Failed to build upstream clients")?;
    info!(
        "Upstream: {} (vision={}, narration={}, speech={})",
        cfg.upstream.base_url,
        cfg.upstream.vision.model,
        cfg.upstream.narration.model,
        cfg.upstream.speech.model
    );

    let state = AppState::new(upstreams, store, objects, cfg.stream.clone());
    let app = create_router(state);

    let port = args.port.unwrap_or(cfg.service.http.port);
    let addr = format!("{}:{}", cfg.service.http.bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
