//! Relaycast - Campaign dispatch service entry point

use anyhow::Result;
use relaycast_common::config::{Config, LoggingConfig};
use relaycast_core::{DispatchWorker, QueueManager, RateGate, TelegramGateway};
use relaycast_storage::{
    DatabasePool, DbCampaignRepository, DbDeliveryRepository, DbSubscriberRepository,
    JobRepository,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Relaycast dispatch service...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    db_pool.health_check().await?;

    // Run migrations
    db_pool.migrate().await?;

    // One gate per process, shared by every send
    let rate_gate = Arc::new(RateGate::from_config(&config.rate_gate));
    let gateway = Arc::new(TelegramGateway::new(&config.gateway, rate_gate)?);

    let worker = Arc::new(DispatchWorker::new(
        Arc::new(DbCampaignRepository::new(db_pool.clone())),
        Arc::new(DbSubscriberRepository::new(db_pool.clone())),
        Arc::new(DbDeliveryRepository::new(db_pool.clone())),
        gateway,
        config.dispatch.clone(),
    ));

    let queue_manager = Arc::new(QueueManager::new(
        JobRepository::new(db_pool.clone()),
        worker,
        config.queue.clone(),
    ));

    match queue_manager.stats().await {
        Ok(stats) => info!(
            pending = stats.pending,
            processing = stats.processing,
            failed = stats.failed,
            "Dispatch queue state"
        ),
        Err(e) => error!("Failed to read queue statistics: {}", e),
    }

    // Start queue processor
    let shutdown = CancellationToken::new();
    let queue_handle = {
        let queue_manager = queue_manager.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            queue_manager.run(shutdown).await;
        })
    };

    info!("Relaycast started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, finishing the current job");

    shutdown.cancel();
    if let Err(e) = queue_handle.await {
        error!("Queue processor terminated abnormally: {}", e);
    }

    info!("Relaycast shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
