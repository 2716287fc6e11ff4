//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::poller::{FleetMonitor, Poller};
use crate::scheduler::Scheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub poller: Poller,
    pub scheduler: Arc<Scheduler>,
    pub fleet: Option<Arc<FleetMonitor>>,
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::handle_health))
        // Targets
        .route(
            "/api/targets",
            get(handlers::handle_get_targets).post(handlers::handle_create_target),
        )
        .route(
            "/api/targets/{name}",
            get(handlers::handle_get_target).delete(handlers::handle_delete_target),
        )
        .route("/api/targets/{name}/poll", post(handlers::handle_poll_target))
        .route("/api/poll", post(handlers::handle_poll_all))
        // Scheduler
        .route("/api/scheduler", get(handlers::handle_get_scheduler))
        .route("/api/scheduler/pause", post(handlers::handle_pause))
        .route("/api/scheduler/resume", post(handlers::handle_resume))
        .route("/api/scheduler/toggle", post(handlers::handle_toggle))
        // Bulk status and notifications
        .route("/api/fleet", get(handlers::handle_get_fleet))
        .route("/api/events", get(handlers::handle_events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}

/// JSON API server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = router(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
