use rtspgate_core::config::EgressConfig;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::connection::RtspConnection;
use super::hub::EgressHub;

/// RTSP listener serving the paths mounted on an [`EgressHub`].
pub struct RtspServer {
    listener: TcpListener,
    hub: Arc<EgressHub>,
    max_connections: usize,
    idle_timeout: Duration,
}

impl RtspServer {
    pub async fn bind(address: &str, hub: Arc<EgressHub>, config: &EgressConfig) -> io::Result<Self> {
        let socket_addr: SocketAddr = address.parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid address '{address}': {e}"),
            )
        })?;
        let listener = TcpListener::bind(socket_addr).await?;
        Ok(Self {
            listener,
            hub,
            max_connections: config.max_connections,
            idle_timeout: Duration::from_secs(config.session_timeout_secs.max(1)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        let active_connections = Arc::new(AtomicUsize::new(0));
        info!(
            address = %self.local_addr()?,
            max_connections = self.max_connections,
            "RTSP server listening"
        );

        loop {
            let (tcp_stream, remote_addr) = tokio::select! {
                () = shutdown.cancelled() => {
                    info!("RTSP server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "RTSP accept failed");
                        continue;
                    }
                },
            };

            let current = active_connections.load(Ordering::Relaxed);
            if current >= self.max_connections {
                warn!(
                    remote_addr = %remote_addr,
                    current,
                    max = self.max_connections,
                    "RTSP connection rejected: at capacity"
                );
                drop(tcp_stream);
                continue;
            }
            if let Err(e) = tcp_stream.set_nodelay(true) {
                debug!(error = %e, "Failed to set TCP_NODELAY");
            }
            let origin_host = tcp_stream
                .local_addr()
                .map_or_else(|_| "0.0.0.0".to_string(), |addr| addr.ip().to_string());

            active_connections.fetch_add(1, Ordering::Relaxed);
            let conn_counter = Arc::clone(&active_connections);
            let connection = RtspConnection::new(
                tcp_stream,
                Arc::clone(&self.hub),
                origin_host,
                self.idle_timeout,
            );
            let connection_token = shutdown.child_token();
            let span = tracing::info_span!("rtsp", remote_addr = %remote_addr);

            tokio::spawn(
                async move {
                    debug!("RTSP connection accepted");
                    if let Err(e) = connection.run(connection_token).await {
                        info!(error = %e, "RTSP connection ended with error");
                    }
                    conn_counter.fetch_sub(1, Ordering::Relaxed);
                }
                .instrument(span),
            );
        }
    }
}
