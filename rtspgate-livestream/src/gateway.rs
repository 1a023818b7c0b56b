// Gateway facade
//
// Single entry point for starting the media plane: RTMP listener, RTSP
// listener, pipeline launcher, SessionRegistry and Supervisor. The binary
// never wires these by hand.

use anyhow::Context;
use rtspgate_core::health::{HealthStore, ResourceProbe};
use rtspgate_core::history::HistoryStore;
use rtspgate_core::models::ServiceState;
use rtspgate_core::{Config, RegistrySettings, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::egress::{EgressHub, RtspServer};
use crate::ingest::{IngestRouter, RtmpServer};
use crate::pipeline::GatewayLauncher;
use crate::supervisor::{ServiceBoard, Supervisor};

pub const INGEST_SERVICE: &str = "ingest";
pub const EGRESS_SERVICE: &str = "egress";

pub struct Gateway;

/// Handle returned by [`Gateway::start`].
///
/// Owns the listener and supervisor tasks and exposes the shared
/// components the control API works with.
pub struct GatewayHandle {
    pub registry: Arc<SessionRegistry>,
    pub hub: Arc<EgressHub>,
    pub router: Arc<IngestRouter>,
    pub health: Arc<HealthStore>,
    pub services: Arc<ServiceBoard>,
    pub supervisor: Arc<Supervisor>,
    pub rtmp_addr: SocketAddr,
    pub rtsp_addr: SocketAddr,
    rtmp_handle: JoinHandle<()>,
    rtsp_handle: JoinHandle<()>,
    poll_handle: JoinHandle<()>,
    restart_handle: JoinHandle<()>,
    shutdown_token: CancellationToken,
}

impl Gateway {
    /// Bind both listeners and start every background task.
    pub async fn start(config: &Config, probe: Arc<dyn ResourceProbe>) -> anyhow::Result<GatewayHandle> {
        let shutdown_token = CancellationToken::new();
        let services = ServiceBoard::new();

        let router = IngestRouter::new();
        let hub = EgressHub::new(&config.egress);

        let rtmp_address = config.ingest_address();
        let rtmp = RtmpServer::bind(&rtmp_address, router.clone(), &config.ingest)
            .await
            .with_context(|| format!("failed to bind RTMP listener on {rtmp_address}"))?;
        let rtmp_addr = rtmp.local_addr()?;

        let rtsp_address = config.egress_address();
        let rtsp = RtspServer::bind(&rtsp_address, hub.clone(), &config.egress)
            .await
            .with_context(|| format!("failed to bind RTSP listener on {rtsp_address}"))?;
        let rtsp_addr = rtsp.local_addr()?;

        let launcher = Arc::new(GatewayLauncher::new(
            router.clone(),
            hub.clone(),
            &config.pipeline,
        ));
        let registry = SessionRegistry::new(
            RegistrySettings::from_config(config),
            launcher,
            Arc::new(HistoryStore::new(config.history.max_records)),
        );
        let health = Arc::new(HealthStore::new(
            config.supervisor.sample_retention(),
            config.supervisor.max_samples,
        ));
        let supervisor = Supervisor::new(
            registry.clone(),
            probe,
            health.clone(),
            services.clone(),
            &config.supervisor,
        );

        let rtmp_handle = spawn_listener(
            INGEST_SERVICE,
            services.clone(),
            rtmp.run(shutdown_token.child_token()),
        );
        let rtsp_handle = spawn_listener(
            EGRESS_SERVICE,
            services.clone(),
            rtsp.run(shutdown_token.child_token()),
        );
        let tasks = supervisor.spawn(shutdown_token.child_token());

        info!(%rtmp_addr, %rtsp_addr, "Gateway started");

        Ok(GatewayHandle {
            registry,
            hub,
            router,
            health,
            services,
            supervisor,
            rtmp_addr,
            rtsp_addr,
            rtmp_handle,
            rtsp_handle,
            poll_handle: tasks.poll,
            restart_handle: tasks.restarts,
            shutdown_token,
        })
    }
}

fn spawn_listener<F>(name: &'static str, services: Arc<ServiceBoard>, run: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = std::io::Result<()>> + Send + 'static,
{
    services.set(name, ServiceState::Running);
    tokio::spawn(async move {
        if let Err(e) = run.await {
            error!(service = name, error = %e, "Listener failed");
        }
        services.set(name, ServiceState::Stopped);
    })
}

impl GatewayHandle {
    /// Abort all spawned tasks in reverse startup order.
    ///
    /// Sessions are left as they are; use `shutdown_graceful` to stop them.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.restart_handle.abort();
        self.poll_handle.abort();
        self.rtsp_handle.abort();
        self.rtmp_handle.abort();
    }

    /// Stop every session, then wait for each task in turn.
    ///
    /// Returns `true` when everything exited within `timeout_secs` per step.
    pub async fn shutdown_graceful(&mut self, timeout_secs: u64) -> bool {
        use tokio::time::timeout;
        let timeout_duration = Duration::from_secs(timeout_secs);
        let mut all_graceful = true;

        info!("Starting graceful shutdown of gateway components...");

        // 1. Stop sessions while the listeners still run, so pipelines release
        //    their paths and history is recorded
        if timeout(timeout_duration, self.registry.stop_all()).await.is_ok() {
            info!("Sessions stopped");
        } else {
            warn!("Stopping sessions timed out");
            all_graceful = false;
        }

        self.shutdown_token.cancel();

        // 2. Supervisor
        if timeout(timeout_duration, &mut self.restart_handle).await.is_ok() {
            info!("Restart loop stopped");
        } else {
            warn!("Restart loop shutdown timed out");
            self.restart_handle.abort();
            all_graceful = false;
        }
        if timeout(timeout_duration, &mut self.poll_handle).await.is_ok() {
            info!("Health poll loop stopped");
        } else {
            warn!("Health poll loop shutdown timed out");
            self.poll_handle.abort();
            all_graceful = false;
        }

        // 3. Listeners
        if timeout(timeout_duration, &mut self.rtsp_handle).await.is_ok() {
            info!("RTSP server stopped");
        } else {
            warn!("RTSP server shutdown timed out");
            self.rtsp_handle.abort();
            all_graceful = false;
        }
        if timeout(timeout_duration, &mut self.rtmp_handle).await.is_ok() {
            info!("RTMP server stopped");
        } else {
            warn!("RTMP server shutdown timed out");
            self.rtmp_handle.abort();
            all_graceful = false;
        }

        if all_graceful {
            info!("Graceful shutdown completed successfully");
        } else {
            warn!("Graceful shutdown completed with some timeouts");
        }

        all_graceful
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtspgate_core::health::StaticProbe;

    fn local_config() -> Config {
        let mut config = Config::default();
        config.ingest.host = "127.0.0.1".to_string();
        config.ingest.port = 0;
        config.egress.host = "127.0.0.1".to_string();
        config.egress.port = 0;
        config
    }

    #[tokio::test]
    async fn test_start_and_graceful_shutdown() {
        let mut handle = Gateway::start(&local_config(), Arc::new(StaticProbe::new(5.0, 5.0)))
            .await
            .unwrap();
        assert_ne!(handle.rtmp_addr.port(), 0);
        assert_ne!(handle.rtsp_addr.port(), 0);

        let services = handle.services.list();
        assert!(services.iter().any(|s| s.name == INGEST_SERVICE));
        assert!(services.iter().any(|s| s.name == EGRESS_SERVICE));

        assert!(handle.shutdown_graceful(5).await);
        assert_eq!(
            handle.services.get(INGEST_SERVICE).unwrap().state,
            ServiceState::Stopped
        );
        assert_eq!(
            handle.services.get(EGRESS_SERVICE).unwrap().state,
            ServiceState::Stopped
        );
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let mut config = local_config();
        config.ingest.host = "not an address".to_string();
        let err = Gateway::start(&config, Arc::new(StaticProbe::new(5.0, 5.0)))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("RTMP"));
    }
}
