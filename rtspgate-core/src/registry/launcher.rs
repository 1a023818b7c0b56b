use futures::future::BoxFuture;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use super::SessionRegistry;
use crate::error::Error;
use crate::models::{EncodingProfile, SessionCounters, SessionId, SessionOptions};

/// Everything a pipeline unit needs to run one session.
pub struct PipelineSpec {
    pub session_id: SessionId,
    pub name: String,
    /// RTMP publish path (`app/key`) the pipeline accepts a publisher on.
    pub ingest_path: String,
    /// RTSP mount path the pipeline serves.
    pub egress_path: String,
    pub profile: EncodingProfile,
    pub options: SessionOptions,
    pub counters: Arc<SessionCounters>,
    /// Cancelled on stop, restart and removal.
    pub cancel: CancellationToken,
    pub epoch: u64,
}

/// Builds the future that runs one pipeline unit.
///
/// The registry spawns the returned future itself, so the launcher never
/// owns task handles.
pub trait PipelineLauncher: Send + Sync + 'static {
    fn launch(&self, spec: PipelineSpec, reporter: PipelineReporter) -> BoxFuture<'static, ()>;
}

/// Channel from a running pipeline back to the registry.
///
/// Reports carry the run epoch they were issued for; once the session has
/// been restarted or stopped they are ignored.
#[derive(Clone)]
pub struct PipelineReporter {
    registry: Weak<SessionRegistry>,
    session_id: SessionId,
    epoch: u64,
}

impl PipelineReporter {
    pub(crate) fn new(registry: Weak<SessionRegistry>, session_id: SessionId, epoch: u64) -> Self {
        Self {
            registry,
            session_id,
            epoch,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// First media frame reached the pipeline.
    pub async fn activated(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.on_activated(&self.session_id, self.epoch).await;
        }
    }

    /// The pipeline gave up; the session moves to `error`.
    pub async fn failed(&self, error: Error) {
        if let Some(registry) = self.registry.upgrade() {
            registry.on_failed(&self.session_id, self.epoch, error).await;
        }
    }
}

/// Registry-side view of a spawned pipeline task.
#[derive(Clone)]
pub(crate) struct PipelineHandle {
    pub cancel: CancellationToken,
    /// Cancelled when the task exits, including on abort.
    pub finished: CancellationToken,
    pub abort: Arc<AbortHandle>,
}

impl PipelineHandle {
    /// Cancel the task and wait for it to exit, aborting it after `timeout`.
    pub async fn drain(&self, timeout: Duration) {
        self.cancel.cancel();
        if tokio::time::timeout(timeout, self.finished.cancelled())
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Pipeline did not exit after cancellation, aborting"
            );
            self.abort.abort();
            self.finished.cancelled().await;
        }
    }
}
