// Module: http
// HTTP/JSON control API

pub mod error;
pub mod history;
pub mod sessions;
pub mod system;


use axum::Router;
use rtspgate_core::health::HealthStore;
use rtspgate_core::SessionRegistry;
use rtspgate_livestream::{GatewayHandle, ServiceBoard};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub health: Arc<HealthStore>,
    pub services: Arc<ServiceBoard>,
}

impl AppState {
    #[must_use]
    pub fn from_gateway(gateway: &GatewayHandle) -> Self {
        Self {
            registry: gateway.registry.clone(),
            health: gateway.health.clone(),
            services: gateway.services.clone(),
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health probe, presets, system status and metrics
        .merge(system::create_system_router())
        // Session CRUD and lifecycle
        .merge(sessions::create_sessions_router())
        // Run history
        .merge(history::create_history_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve `router` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!(address = ?listener.local_addr().ok(), "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP server shut down gracefully");
    Ok(())
}
