//! Transcoding worker binary.

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vpipe_bus::MessageBus;
use vpipe_worker::shutdown::signal_handler;
use vpipe_worker::{EncodeWorker, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Colored output for interactive use, JSON for deployments.
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vpipe=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vpipe-worker");

    let config = WorkerConfig::from_env();
    info!(
        name = %config.name,
        max_prefetch_jobs = config.max_prefetch_jobs,
        encode_jobs = config.encode_jobs,
        threads = config.threads,
        paused = config.paused,
        "Worker config loaded"
    );

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

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(signal_handler(shutdown_tx));

    let worker = match EncodeWorker::new(config, bus, shutdown_rx) {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to create worker: {}", e);
            std::process::exit(1);
        }
    };

    match worker.resume().await {
        Ok(0) => {}
        Ok(resumed) => info!("Resumed {} checkpointed jobs", resumed),
        Err(e) => error!("Checkpoint scan failed: {}", e),
    }

    worker.run().await;

    info!("Worker shutdown complete");
}
