//! Chanport daemon — content migration engine.
//!
//! Main entry point that wires the store adapter, resource monitor, and
//! job scheduler together and runs until interrupted. The content
//! platform client and the command layer live outside this binary; the
//! default wiring uses the in-process providers so the engine can run
//! locally end to end.

use std::sync::Arc;

use tokio::sync::watch;
use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use chanport_core::config::EngineConfig;
use chanport_core::error::AppError;
use chanport_core::traits::{ContentSource, DocumentStore, PassthroughPipeline};
use chanport_engine::{JobScheduler, MemorySource, ResourceMonitor, SchedulerContext};
use chanport_store::{BatchedStoreAdapter, CheckpointStore, MemoryDocumentStore, QuotaGuard};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Engine error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from file and environment
fn load_configuration() -> Result<EngineConfig, AppError> {
    let env = std::env::var("CHANPORT_ENV").unwrap_or_else(|_| "development".to_string());
    EngineConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &EngineConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt().pretty().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Main engine run function
async fn run(config: EngineConfig) -> Result<(), AppError> {
    tracing::info!("Starting Chanport v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Remote store plumbing ────────────────────────────
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    let quota = Arc::new(QuotaGuard::new(config.quota.clone()));
    let adapter = BatchedStoreAdapter::start(
        Arc::clone(&store),
        Arc::clone(&quota),
        config.store.clone(),
    );
    let checkpoints = Arc::new(CheckpointStore::new(
        Arc::clone(&store),
        Arc::clone(&adapter),
        Arc::clone(&quota),
        &config.store,
    ));
    tracing::info!("Store adapter started");

    // ── Step 2: Resource monitor ─────────────────────────────────
    let (monitor, pressure_rx) = ResourceMonitor::new(config.monitor.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(Arc::clone(&monitor).run(shutdown_rx));

    // ── Step 3: Job scheduler ────────────────────────────────────
    let source: Arc<dyn ContentSource> = Arc::new(MemorySource::new());
    let scheduler = JobScheduler::start(
        config.scheduler.clone(),
        SchedulerContext {
            source,
            pipeline: Arc::new(PassthroughPipeline),
            checkpoints,
            adapter: Arc::clone(&adapter),
            migration: config.migration.clone(),
            pressure: pressure_rx,
        },
    );
    tracing::info!(
        "Scheduler started (max {} concurrent job(s))",
        config.scheduler.max_concurrent_jobs
    );

    // ── Step 4: Run until interrupted ────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::internal(format!("Failed to listen for shutdown: {e}")))?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    scheduler.shutdown().await?;

    let stats = adapter.stats();
    tracing::info!(
        "Adapter drained: {} flushed, {} dead-lettered, {} still pending",
        stats.flushed_total,
        stats.dead_letter_count,
        stats.pending
    );
    tracing::info!("Chanport stopped");
    Ok(())
}
