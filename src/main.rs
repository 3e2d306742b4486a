// chatbridge - OpenAI-compatible streaming gateway for a ChatGPT-style conversation backend
// Author: kelexine (https://github.com/kelexine)

use anyhow::{Context, Result};
use chatbridge::auth::AccountCredentials;
use chatbridge::cli::Args;
use chatbridge::config::AppConfig;
use chatbridge::models::ModelRegistry;
use chatbridge::server::{create_router, AppState};
use chatbridge::storage::FileStore;
use chatbridge::upstream::UpstreamClient;
use chatbridge::utils::logging;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Phase 1: Load configuration
    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting chatbridge v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Upstream client and credentials
    let upstream = UpstreamClient::new(&config.upstream)?;
    info!("Upstream root: {}", upstream.root());
    let credentials = AccountCredentials::new(&config.auth, &config.upstream, upstream.http_client().clone())?;

    // Phase 4: Models and artifact storage
    let mut registry = ModelRegistry::from_entries(&config.models)?;
    if !registry.gizmo_models().is_empty() {
        let token = match credentials.get_token().await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("No upstream token to verify gizmo models: {}", e);
                None
            }
        };
        upstream.verify_gizmos(token.as_deref(), &mut registry).await;
    }
    if registry.names().is_empty() {
        warn!("No models configured; every chat request will be rejected");
    }
    let store = FileStore::new(&config.storage);
    info!("Serving stored artifacts under {}", store.public_base_url());

    // Phase 5: Build and start HTTP server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    let state = AppState {
        config: Arc::new(config),
        registry: Arc::new(registry),
        credentials: Arc::new(credentials),
        upstream: Arc::new(upstream),
        store: Arc::new(store),
    };
    let app = create_router(state);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Phase 6: Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
