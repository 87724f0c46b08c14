//! `ccbuilder-optd`: the optimisation manager daemon.
//!
//! Starts the worker pool and runs the poller/reaper until interrupted.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ccbuilder_db::{Database, PgConnector, PoolConfig};
use ccbuilder_jobs::{JobQueue, Poller, ProcessEngine, WorkerPool};
use ccbuilder_service::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = ServiceConfig::from_env()?;

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default depends on CCBUILDER_CONFIG)
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.default_log_filter().into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("ccbuilder-optd.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        profile = %config.profile,
        "Logging initialized"
    );

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;
    info!(subsystem = "database", "Migrations applied");

    let engine = ProcessEngine::new(&config.engine_command);
    if !engine.health_check().await {
        warn!(
            subsystem = "engine",
            command = %config.engine_command,
            "Modeling engine did not answer --version; jobs will fail until it is available"
        );
    }

    let queue = Arc::new(JobQueue::new());
    let connector = Arc::new(PgConnector::new(&config.database_url, PoolConfig::worker()));
    let pool = WorkerPool::new(connector, Arc::new(engine), queue.clone(), config.worker.clone());
    let poller = Poller::new(Arc::new(db), queue, pool.assignments())
        .with_interval(config.poll_interval);

    let handle = pool.start();
    let (stop_tx, stop_rx) = watch::channel(false);
    let poller_task = tokio::spawn(poller.run(stop_rx));

    info!(
        profile = %config.profile,
        workers = config.worker.workers,
        poll_interval_secs = config.poll_interval.as_secs(),
        "ccbuilder-optd running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    stop_tx.send_replace(true);
    if let Err(e) = poller_task.await {
        warn!(error = %e, "Poller task ended abnormally");
    }
    handle.shutdown().await?;

    info!("ccbuilder-optd stopped");
    Ok(())
}
