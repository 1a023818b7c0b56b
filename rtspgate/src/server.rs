// Server wiring: the media plane from rtspgate-livestream plus the HTTP
// control API, with signal-driven graceful shutdown.

use anyhow::{Context, Result};
use rtspgate_api::{create_router, serve, AppState};
use rtspgate_core::health::ProcfsProbe;
use rtspgate_core::models::ServiceState;
use rtspgate_core::Config;
use rtspgate_livestream::{Gateway, GatewayHandle};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const API_SERVICE: &str = "api";

pub struct GatewayServer {
    config: Config,
    gateway: GatewayHandle,
    http_handle: JoinHandle<()>,
    http_shutdown: CancellationToken,
}

impl GatewayServer {
    pub async fn start(config: Config) -> Result<Self> {
        let gateway = Gateway::start(&config, Arc::new(ProcfsProbe::new())).await?;
        info!(rtmp = %gateway.rtmp_addr, rtsp = %gateway.rtsp_addr, "Media plane started");

        let http_address = config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .with_context(|| format!("failed to bind HTTP address {http_address}"))?;
        let router = create_router(AppState::from_gateway(&gateway));
        let http_shutdown = CancellationToken::new();
        let shutdown = http_shutdown.clone();
        let services = gateway.services.clone();
        services.set(API_SERVICE, ServiceState::Running);
        let http_handle = tokio::spawn(async move {
            if let Err(e) = serve(listener, router, shutdown).await {
                error!("HTTP server error: {}", e);
            }
            services.set(API_SERVICE, ServiceState::Stopped);
        });

        Ok(Self {
            config,
            gateway,
            http_handle,
            http_shutdown,
        })
    }

    pub async fn run_until_shutdown(mut self) -> Result<()> {
        shutdown_signal().await;
        info!("Shutdown signal received, starting graceful shutdown...");

        // Sessions are stopped before the API goes away so their history is
        // recorded.
        let timeout_secs = (self.config.pipeline.shutdown_timeout_ms / 1000).max(1) * 2;
        if !self.gateway.shutdown_graceful(timeout_secs).await {
            warn!("Gateway did not shut down cleanly, aborting remaining tasks");
            self.gateway.shutdown();
        }

        self.http_shutdown.cancel();
        if let Err(e) = self.http_handle.await {
            error!("HTTP server task failed: {}", e);
        }
        info!("rtspgate stopped");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
