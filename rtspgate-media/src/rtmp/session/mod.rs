pub mod chunk_io;
pub mod client_session;
pub mod errors;
pub mod server_session;

use {crate::frame::MediaFrame, async_trait::async_trait};

/// Why a publish request was turned down; sent back as the description of
/// `NetStream.Publish.BadName`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct PublishRejected {
    pub reason: String,
}

impl PublishRejected {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Decides whether `app/stream` may publish and where its frames go.
#[async_trait]
pub trait PublishHandler: Send + Sync {
    async fn on_publish(
        &self,
        app_name: &str,
        stream_name: &str,
    ) -> Result<Box<dyn MediaSink>, PublishRejected>;
}

/// Receiver of a publisher's frames.
#[async_trait]
pub trait MediaSink: Send {
    /// Returns `false` once the sink no longer accepts frames, which ends
    /// the publishing connection.
    async fn push(&mut self, frame: MediaFrame) -> bool;
}
