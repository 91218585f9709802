use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use cdm_schema_sync::api;
use cdm_schema_sync::config::Config;
use cdm_schema_sync::services::{AuxiliaryData, DefaultBackendFactory, EnvSettings, TriggerDispatcher, WaitPolicy};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_ansi(config.logging.style != "never")
        .init();

    info!("Starting server on {}", config.server_address());

    // Auxiliary lookup files are shared read-only by every invocation
    let auxiliary = AuxiliaryData::load(&config.auxiliary.directory).map_err(|e| {
        error!("Failed to load auxiliary data: {:#}", e);
        e
    })?;

    let settings = EnvSettings::from_env();
    info!("Loaded {} settings from the environment", settings.len());

    let local_root = config.data_lake.local_root.as_ref().map(PathBuf::from);
    if let Some(root) = &local_root {
        info!("Serving data lake URLs from {}", root.display());
    }

    let http_client = reqwest::Client::builder()
        .timeout(config.data_lake.request_timeout())
        .build()?;
    let factory = DefaultBackendFactory::new(http_client, local_root);
    let dispatcher = Arc::new(TriggerDispatcher::new(
        Arc::new(settings),
        Arc::new(auxiliary),
        Arc::new(factory),
        WaitPolicy::from(&config.landing_zone),
    ));

    let shutdown = CancellationToken::new();
    let tasks = TaskTracker::new();

    // Create router with state
    let app: Router = api::routes::create_router_with_state(dispatcher, shutdown.clone(), tasks.clone());

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    // In-flight event runs observe the cancelled token and finish promptly
    tasks.close();
    info!("Waiting for {} background invocation(s)", tasks.len());
    tasks.wait().await;

    Ok(())
}

/// Resolves on Ctrl+C and cancels every in-flight invocation
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested, cancelling in-flight invocations");
    shutdown.cancel();
}
