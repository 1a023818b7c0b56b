use rtspgate_core::config::IngestConfig;
use rtspgate_core::metrics;
use rtspgate_media::rtmp::session::server_session::ServerSession;
use rtspgate_media::rtmp::session::PublishHandler;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// RTMP listener. Each accepted connection runs a [`ServerSession`] on its
/// own task; publishers are routed through the [`PublishHandler`].
pub struct RtmpServer {
    listener: TcpListener,
    handler: Arc<dyn PublishHandler>,
    max_connections: usize,
    chunk_size: u32,
}

impl RtmpServer {
    pub async fn bind(
        address: &str,
        handler: Arc<dyn PublishHandler>,
        config: &IngestConfig,
    ) -> io::Result<Self> {
        let socket_addr: SocketAddr = address.parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid address '{address}': {e}"),
            )
        })?;
        let listener = TcpListener::bind(socket_addr).await?;
        Ok(Self {
            listener,
            handler,
            max_connections: config.max_connections,
            chunk_size: config.chunk_size,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` is cancelled. Open connections are closed
    /// with it.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        let active_connections = Arc::new(AtomicUsize::new(0));
        info!(
            address = %self.local_addr()?,
            max_connections = self.max_connections,
            "RTMP server listening"
        );

        loop {
            let (tcp_stream, remote_addr) = tokio::select! {
                () = shutdown.cancelled() => {
                    info!("RTMP server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "RTMP accept failed");
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
                    "RTMP connection rejected: at capacity"
                );
                drop(tcp_stream);
                continue;
            }
            if let Err(e) = tcp_stream.set_nodelay(true) {
                debug!(error = %e, "Failed to set TCP_NODELAY");
            }

            active_connections.fetch_add(1, Ordering::Relaxed);
            metrics::media::INGEST_CONNECTIONS.inc();
            let conn_counter = Arc::clone(&active_connections);
            let connection_token = shutdown.child_token();
            let mut session = ServerSession::new(tcp_stream, Arc::clone(&self.handler))
                .with_chunk_size(self.chunk_size);
            let span = tracing::info_span!("rtmp", remote_addr = %remote_addr);

            tokio::spawn(
                async move {
                    debug!("RTMP connection accepted");
                    tokio::select! {
                        () = connection_token.cancelled() => {
                            debug!("RTMP connection closed on shutdown");
                        }
                        result = session.run() => match result {
                            Ok(()) => debug!(
                                app_name = %session.app_name,
                                stream_name = %session.stream_name,
                                bytes_received = session.bytes_received(),
                                "RTMP connection finished"
                            ),
                            Err(err) => info!(
                                app_name = %session.app_name,
                                stream_name = %session.stream_name,
                                error = %err,
                                "RTMP session ended with error"
                            ),
                        },
                    }
                    conn_counter.fetch_sub(1, Ordering::Relaxed);
                    metrics::media::INGEST_CONNECTIONS.dec();
                }
                .instrument(span),
            );
        }
    }
}
