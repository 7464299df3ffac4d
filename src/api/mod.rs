//! REST API of one fleet instance
//!
//! This module exposes the instance's own state, the fleet view and the
//! instruction dispatch over HTTP.
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Shared store** for reads and publishing instructions
//! - **Aggregator** for the fleet view
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/info` - Own snapshot and visitor counter
//! - `POST /api/action` - Publish an instruction to an instance
//! - `GET /api/heartbeats` - Last heartbeat of every instance
//! - `GET /api/fleet` - Aggregated fleet view
//!
//! There is no authentication; the API is meant for trusted networks.

pub mod error;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;
pub use types::{
    ActionRequest, ActionResponse, FleetResponse, HealthResponse, HeartbeatEntry,
    HeartbeatsResponse, InfoResponse,
};

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Enable CORS for dashboards served from elsewhere
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
        }
    }
}

/// Build the router with all routes
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/info", get(routes::info::get_info))
        .route("/api/action", post(routes::action::post_action))
        .route("/api/heartbeats", get(routes::heartbeats::list_heartbeats))
        .route("/api/fleet", get(routes::fleet::get_fleet))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let mut app = router(state);

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
