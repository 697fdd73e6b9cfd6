//! ipwatch - IP reachability monitor
//!
//! Pings every registered target on a timer or on demand, keeps the check
//! history in SQLite and serves a dashboard with rolling availability.

mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use probe::PingProber;
use scheduler::Sweeper;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("ipwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting ipwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    tracing::info!(
        "Probe timeout {:?}, at most {} probes in flight",
        cfg.probe_timeout,
        cfg.max_concurrent_probes
    );

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized with {} targets", store.list_targets()?.len());

    let sweeper = Arc::new(Sweeper::new(store.clone(), PingProber, cfg.sweep_config()));

    // Start background sweeps
    let sweep_loop = match cfg.sweep_interval {
        Some(period) => Some(sweeper.spawn_sweep_loop(period)),
        None => {
            tracing::info!("Background sweeps disabled; use POST /api/check_all");
            None
        }
    };

    // Start web server
    let server = Server::new(cfg.http_port, store, sweeper);
    let served = server.start(shutdown_signal()).await;

    if let Some(sweep_loop) = sweep_loop {
        sweep_loop.stop().await;
    }
    tracing::info!("ipwatch stopped");

    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
