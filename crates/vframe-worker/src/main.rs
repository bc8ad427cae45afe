//! Frame extraction worker binary.

use std::net::SocketAddr;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vframe_queue::MessageQueue;
use vframe_worker::{
    metrics, validate_environment, JobExecutor, WorkerConfig, WorkflowContext, WorkflowEngine,
    WorkflowSettings,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

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
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vframe-worker");

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        match addr.parse::<SocketAddr>() {
            Ok(addr) => match metrics::install_exporter(addr) {
                Ok(()) => info!("Serving metrics on {}", addr),
                Err(e) => warn!("{}", e),
            },
            Err(e) => warn!("Ignoring invalid METRICS_ADDR '{}': {}", addr, e),
        }
    }

    // Load configuration
    let config = match WorkerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Worker config: {:?}", config);

    let binaries = match validate_environment(&config) {
        Ok(b) => b,
        Err(e) => {
            error!("Environment validation failed: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ctx = match WorkflowContext::from_config(&config, &binaries, shutdown_rx.clone()).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to create workflow context: {}", e);
            std::process::exit(1);
        }
    };
    let engine = WorkflowEngine::new(WorkflowSettings::from(&config), ctx);

    // Create queue client
    let queue = match MessageQueue::new(config.queue.clone()) {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create message queue: {}", e);
            std::process::exit(1);
        }
    };

    let executor = JobExecutor::new(config, queue, engine, shutdown_rx);

    // Setup signal handlers
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    // Run executor
    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
