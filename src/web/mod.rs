//! Web server module: dashboard, JSON API and export.

mod error;
mod handlers;
mod render;

pub use error::*;
pub use handlers::*;
pub use render::*;

use crate::db::Store;
use crate::probe::PingProber;
use crate::scheduler::Sweeper;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
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
    pub store: Arc<Store>,
    pub sweeper: Arc<Sweeper<PingProber>>,
}

/// Web server for ipwatch.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(port: u16, store: Arc<Store>, sweeper: Arc<Sweeper<PingProber>>) -> Self {
        Self {
            port,
            state: AppState { store, sweeper },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/", get(handlers::handle_dashboard))
            .route(
                "/api/targets",
                get(handlers::handle_get_targets).post(handlers::handle_create_target),
            )
            .route(
                "/api/targets/{id}",
                put(handlers::handle_update_target).delete(handlers::handle_delete_target),
            )
            .route("/api/targets/{id}/history", get(handlers::handle_get_history))
            .route("/api/search", get(handlers::handle_search))
            .route("/api/check_all", post(handlers::handle_check_all))
            .route("/check_all", post(handlers::handle_check_all_form))
            .route("/export.csv", get(handlers::handle_export_csv))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves.
    pub async fn start(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
