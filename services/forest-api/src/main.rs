//! Forest API Server
//!
//! Serves forest-change map tiles and per-year forest area statistics.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use forest_api::config::ServiceArgs;
use forest_api::router;
use forest_api::state::AppState;

fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = ServiceArgs::parse();

    // Build runtime with configured threads
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();

    if let Some(threads) = args.worker_threads {
        runtime_builder.worker_threads(threads);
    }

    let runtime = runtime_builder
        .build()
        .context("failed to create Tokio runtime")?;
    runtime.block_on(run_server(args))
}

async fn run_server(args: ServiceArgs) -> Result<()> {
    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .json()
        .init();

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    info!(
        tiles_collection = %args.tiles_collection,
        layer_prefix = %args.layer_prefix,
        "Starting forest API server"
    );

    let state = Arc::new(AppState::from_args(&args, Some(prometheus))?);

    // Warm the tile index; requests retry the fetch if this fails.
    match state.pipeline.tile_index().get().await {
        Ok(index) => info!(tiles = index.len(), "Tile index loaded"),
        Err(e) => warn!(error = %e, "Tile index not loaded at startup"),
    }

    let app = router(state);

    let addr: SocketAddr = args
        .listen
        .parse()
        .with_context(|| format!("invalid listen address '{}'", args.listen))?;
    info!("Forest API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");
}
