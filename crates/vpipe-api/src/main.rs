//! Coordinator binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vpipe_api::services::{EventIngest, Scheduler};
use vpipe_api::{create_router, AppState, ServerConfig};
use vpipe_bus::MessageBus;
use vpipe_repo::JobRepository;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive("vpipe=info".parse().unwrap()))
        .init();

    info!("Starting vpipe-api");

    let config = ServerConfig::from_env();
    info!(
        host = %config.host,
        port = config.port,
        public_url = %config.public_url,
        "Coordinator config loaded"
    );

    // Storage roots must exist before anything is scheduled.
    for path in [&config.download_path, &config.upload_path] {
        if let Err(e) = tokio::fs::create_dir_all(path).await {
            error!("Failed to prepare storage root {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }

    let repo = match JobRepository::connect(&config.database_url).await {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to initialize repository: {}", e);
            std::process::exit(1);
        }
    };

    let bus = match MessageBus::from_env() {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to create message bus: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = bus.init().await {
        error!("Failed to initialize bus streams: {}", e);
        std::process::exit(1);
    }

    let state = AppState::new(config.clone(), repo, bus);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(
        Arc::clone(&state.config),
        Arc::clone(&state.repo),
        Arc::clone(&state.bus),
        shutdown_rx.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run());

    let ingest = EventIngest::new(
        Arc::clone(&state.repo),
        Arc::clone(&state.bus),
        shutdown_rx.clone(),
    );
    let ingest_handle = tokio::spawn(ingest.run());

    let app = create_router(state);
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(a) => a,
        Err(e) => {
            error!("Invalid bind address: {}", e);
            std::process::exit(1);
        }
    };

    info!("Listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let serve_shutdown = shutdown_tx.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_shutdown.send(true).ok();
        })
        .await
    {
        error!("Server error: {}", e);
    }

    // Let in-flight events drain before exiting.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        scheduler_handle.await.ok();
        ingest_handle.await.ok();
    })
    .await;

    info!("Coordinator shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Received shutdown signal");
}
