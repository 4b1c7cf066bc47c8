//! Model Host - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use model_host::{
    HostConfig, Manifest, ModelManager, api,
    engine::EchoLoader,
    metrics,
    models::{Downloader, HubClient},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "model-host")]
#[command(about = "Local model pull, load and chat completion host", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override API port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override listen address
    #[arg(short = 'n', long)]
    host: Option<String>,

    /// Manifest declaring the models that may be pulled
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Root directory for downloaded models
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Runtime worker threads
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        cli.log_level.clone()
    };
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt().with_env_filter(&log_level).init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting Model Host");

    // Load configuration
    let mut config = HostConfig::load(cli.config)?;

    // CLI overrides
    if let Some(port) = cli.port {
        config.api_port = port;
    }
    if let Some(host) = cli.host {
        config.bind_address = host;
    }
    if let Some(manifest) = cli.manifest {
        config.manifest = Some(manifest);
    }
    if let Some(models_dir) = cli.models_dir {
        config.models_dir = models_dir;
    }
    if let Some(threads) = cli.threads {
        config.worker_threads = Some(threads);
    }

    config.validate()?;

    tracing::info!(
        listen = %config.listen_address(),
        models_dir = ?config.models_dir,
        manifest = ?config.manifest,
        hub_endpoint = %config.hub_endpoint,
        "Configuration loaded"
    );

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if let Some(threads) = config.worker_threads {
        tracing::debug!(threads, "Using configured worker thread count");
        runtime.worker_threads(threads);
    }
    let runtime = runtime.build().context("Failed to build async runtime")?;

    runtime.block_on(serve(config))
}

async fn serve(config: HostConfig) -> Result<()> {
    // A manifest that was asked for must be readable
    let manifest = match &config.manifest {
        Some(path) => Manifest::load(path)
            .with_context(|| format!("Failed to load manifest: {:?}", path))?,
        None => {
            tracing::info!("No manifest supplied, no models can be pulled");
            Manifest::empty()
        }
    };
    tracing::info!(models = manifest.len(), "Manifest loaded");

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    let hub = HubClient::new(&config.hub_endpoint, config.hub_token.clone())
        .context("Failed to build hub client")?;

    let manager = ModelManager::init(
        manifest,
        config.models_dir.clone(),
        Downloader::new(hub),
        Arc::new(EchoLoader::new()),
    )
    .await
    .context("Failed to scan models directory")?;

    // Setup API
    let app_state = api::AppState {
        manager: Arc::new(manager),
        prometheus_handle,
    };

    let app = api::create_router(app_state);

    let addr = config.listen_address();
    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API server to {}", addr))?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
