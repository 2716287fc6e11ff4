//! serverwatch - server status poller
//!
//! Polls HTTP status endpoints for CPU, memory and status, keeps a short
//! rolling history per server, and serves it as a JSON API.

mod config;
mod poller;
mod probe;
mod scheduler;
mod store;
mod web;

use config::ServerConfig;
use poller::Poller;
use probe::HttpStatusFetcher;
use scheduler::Scheduler;
use store::Registry;
use web::{AppState, Server};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("serverwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting serverwatch on port {}...", cfg.http_port);
    tracing::info!(
        "Polling every {:?} with a {:?} request timeout",
        cfg.poll_interval,
        cfg.request_timeout
    );

    let fetcher = Arc::new(HttpStatusFetcher::new(cfg.request_timeout)?);
    let registry = Arc::new(Registry::new());
    let poller = Poller::new(registry, fetcher, cfg.request_timeout);

    for seed in &cfg.seed_targets {
        if let Err(e) = poller.add_target(&seed.name, &seed.endpoint) {
            tracing::warn!("Skipping seed target {}: {}", seed.name, e);
        }
    }
    tracing::info!("Monitoring {} targets", poller.targets().len());

    let fleet = cfg.bulk_endpoint.as_deref().map(|endpoint| {
        tracing::info!("Fleet monitor enabled for {}", endpoint);
        Arc::new(poller.fleet_monitor(endpoint))
    });

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(poller.clone(), fleet.clone(), cfg.poll_interval));
    scheduler.start(cfg.start_paused).await;

    // Start web server
    let server = Server::new(AppState {
        config: cfg,
        poller,
        scheduler: scheduler.clone(),
        fleet,
    });
    let result = server.start(shutdown_signal()).await;

    scheduler.shutdown().await;
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
