//! Web server module.

mod handlers;

use crate::coordinator::Manager;
use crate::metrics::MetricsStore;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub metrics: Arc<MetricsStore>,
}

/// Read-only status and metrics server.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(port: u16, manager: Arc<Manager>, metrics: Arc<MetricsStore>) -> Self {
        Self {
            port,
            state: AppState { manager, metrics },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        router(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/api/health", get(handlers::handle_health))
        .route("/api/status", get(handlers::handle_status))
        .route("/api/metrics", get(handlers::handle_metrics))
        .route("/api/metrics/{band}", get(handlers::handle_band_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
