//! chronokv server binary
//!
//! Wires the storage engine, the background expiry sweeper and the TCP
//! accept loop together, then waits for Ctrl+C.

use anyhow::Context;
use chronokv::config::Config;
use chronokv::server::Server;
use chronokv::storage::{ExpirySweeper, StorageEngine};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    let expiry = config.expiry_config().context("invalid sweeper configuration")?;

    let storage = Arc::new(StorageEngine::new());
    info!(shards = storage.shard_count(), "Storage engine initialized");

    let sweeper = ExpirySweeper::start(Arc::clone(&storage), expiry);

    let server = Server::bind(config.bind_address(), Arc::clone(&storage))
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(
        version = chronokv::VERSION,
        addr = %server.local_addr()?,
        "chronokv ready to accept connections"
    );

    server
        .run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received, stopping server...");
        })
        .await;

    sweeper.shutdown().await;

    let stats = storage.stats();
    info!(
        keys = stats.keys,
        lazy_expired = stats.lazy_expired,
        active_expired = stats.active_expired,
        sweep_cycles = stats.sweep_cycles,
        "Server shutdown complete"
    );
    Ok(())
}
