//! Maps RTMP publish paths (`app/stream_key`) to the pipeline that claimed
//! them.
//!
//! A pipeline registers its ingest path and then waits on the returned
//! [`IngestRegistration`] for a publisher. Every accepted publisher gets a
//! fresh bounded frame channel, so the pipeline sees the publisher leave as
//! the end of that channel.

use async_trait::async_trait;
use dashmap::DashMap;
use rtspgate_core::metrics;
use rtspgate_core::models::SessionCounters;
use rtspgate_media::rtmp::session::{MediaSink, PublishHandler, PublishRejected};
use rtspgate_media::MediaFrame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Frames of one publisher connection.
pub struct PublisherFeed {
    pub path: String,
    pub frames: mpsc::Receiver<MediaFrame>,
}

struct Route {
    generation: u64,
    publishers: mpsc::Sender<PublisherFeed>,
    counters: Arc<SessionCounters>,
    buffer_frames: usize,
    publishing: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct IngestRouter {
    routes: DashMap<String, Route>,
    next_generation: AtomicU64,
}

impl IngestRouter {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `path` for a pipeline. A newer registration replaces an older
    /// one for the same path; the older pipeline stops receiving publishers.
    pub fn register(
        self: &Arc<Self>,
        path: &str,
        counters: Arc<SessionCounters>,
        buffer_frames: usize,
    ) -> IngestRegistration {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (publishers, receiver) = mpsc::channel(1);
        let previous = self.routes.insert(
            path.to_string(),
            Route {
                generation,
                publishers,
                counters,
                buffer_frames: buffer_frames.max(1),
                publishing: Arc::new(AtomicBool::new(false)),
            },
        );
        if previous.is_some() {
            debug!(path = %path, "Ingest path re-registered");
        }
        IngestRegistration {
            path: path.to_string(),
            generation,
            router: Arc::downgrade(self),
            publishers: receiver,
        }
    }

    #[must_use]
    pub fn is_registered(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    #[must_use]
    pub fn is_publishing(&self, path: &str) -> bool {
        self.routes
            .get(path)
            .is_some_and(|route| route.publishing.load(Ordering::SeqCst))
    }

    fn unregister(&self, path: &str, generation: u64) {
        if self
            .routes
            .remove_if(path, |_, route| route.generation == generation)
            .is_some()
        {
            debug!(path = %path, "Ingest path released");
        }
    }

    fn accept(&self, path: &str) -> Result<RouteSink, PublishRejected> {
        let route = self
            .routes
            .get(path)
            .ok_or_else(|| PublishRejected::new(format!("no started session for {path}")))?;

        if route.publishing.swap(true, Ordering::SeqCst) {
            return Err(PublishRejected::new(format!("{path} already has a publisher")));
        }

        let (sender, frames) = mpsc::channel(route.buffer_frames);
        let feed = PublisherFeed {
            path: path.to_string(),
            frames,
        };
        if route.publishers.try_send(feed).is_err() {
            route.publishing.store(false, Ordering::SeqCst);
            return Err(PublishRejected::new(format!("pipeline for {path} is not accepting publishers")));
        }

        Ok(RouteSink {
            path: path.to_string(),
            sender,
            counters: Arc::clone(&route.counters),
            publishing: Arc::clone(&route.publishing),
        })
    }
}

#[async_trait]
impl PublishHandler for IngestRouter {
    async fn on_publish(
        &self,
        app_name: &str,
        stream_name: &str,
    ) -> Result<Box<dyn MediaSink>, PublishRejected> {
        let path = format!("{app_name}/{stream_name}");
        match self.accept(&path) {
            Ok(sink) => {
                info!(path = %path, "Publisher attached");
                Ok(Box::new(sink))
            }
            Err(rejected) => {
                warn!(path = %path, reason = %rejected, "Publish rejected");
                Err(rejected)
            }
        }
    }
}

/// A pipeline's claim on an ingest path; released on drop.
pub struct IngestRegistration {
    path: String,
    generation: u64,
    router: Weak<IngestRouter>,
    publishers: mpsc::Receiver<PublisherFeed>,
}

impl IngestRegistration {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next publisher. `None` once a newer registration took
    /// the path over.
    pub async fn next_publisher(&mut self) -> Option<PublisherFeed> {
        self.publishers.recv().await
    }
}

impl Drop for IngestRegistration {
    fn drop(&mut self) {
        if let Some(router) = self.router.upgrade() {
            router.unregister(&self.path, self.generation);
        }
    }
}

/// Publisher side of a feed. Never blocks the RTMP connection: when the
/// pipeline is behind, frames are dropped and counted.
struct RouteSink {
    path: String,
    sender: mpsc::Sender<MediaFrame>,
    counters: Arc<SessionCounters>,
    publishing: Arc<AtomicBool>,
}

#[async_trait]
impl MediaSink for RouteSink {
    async fn push(&mut self, frame: MediaFrame) -> bool {
        let size = frame.len();
        match self.sender.try_send(frame) {
            Ok(()) => {
                metrics::media::INGEST_BYTES_TOTAL.inc_by(size as u64);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.record_drop();
                metrics::media::DROPPED_FRAMES_TOTAL.inc();
                debug!(path = %self.path, "Pipeline buffer full, dropping frame");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

impl Drop for RouteSink {
    fn drop(&mut self) {
        self.publishing.store(false, Ordering::SeqCst);
        info!(path = %self.path, "Publisher detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn video(ts: u32) -> MediaFrame {
        MediaFrame::Video {
            timestamp: ts,
            data: Bytes::from_static(&[0x17, 0x01]),
        }
    }

    #[tokio::test]
    async fn test_unregistered_path_is_rejected() {
        let router = IngestRouter::new();
        let result = router.on_publish("live", "nobody").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_publisher_reaches_pipeline() {
        let router = IngestRouter::new();
        let counters = Arc::new(SessionCounters::default());
        let mut registration = router.register("live/cam", counters, 8);

        let mut sink = router.on_publish("live", "cam").await.unwrap();
        assert!(router.is_publishing("live/cam"));
        assert!(sink.push(video(0)).await);

        let mut feed = registration.next_publisher().await.unwrap();
        assert_eq!(feed.path, "live/cam");
        assert_eq!(feed.frames.recv().await, Some(video(0)));

        drop(sink);
        assert!(feed.frames.recv().await.is_none());
        assert!(!router.is_publishing("live/cam"));
    }

    #[tokio::test]
    async fn test_second_publisher_is_rejected() {
        let router = IngestRouter::new();
        let _registration = router.register("live/cam", Arc::new(SessionCounters::default()), 8);

        let _first = router.on_publish("live", "cam").await.unwrap();
        assert!(router.on_publish("live", "cam").await.is_err());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_and_counts() {
        let router = IngestRouter::new();
        let counters = Arc::new(SessionCounters::default());
        let _registration = router.register("live/cam", Arc::clone(&counters), 2);

        let mut sink = router.on_publish("live", "cam").await.unwrap();
        for ts in 0..5 {
            assert!(sink.push(video(ts)).await);
        }
        assert_eq!(counters.snapshot(0).dropped_frames, 3);
    }

    #[tokio::test]
    async fn test_sink_closes_when_pipeline_exits() {
        let router = IngestRouter::new();
        let mut registration = router.register("live/cam", Arc::new(SessionCounters::default()), 8);
        let mut sink = router.on_publish("live", "cam").await.unwrap();

        let feed = registration.next_publisher().await.unwrap();
        drop(feed);
        drop(registration);

        assert!(!sink.push(video(0)).await);
        assert!(!router.is_registered("live/cam"));
    }

    #[tokio::test]
    async fn test_stale_registration_does_not_release_newer_one() {
        let router = IngestRouter::new();
        let counters = Arc::new(SessionCounters::default());
        let old = router.register("live/cam", Arc::clone(&counters), 8);
        let _new = router.register("live/cam", counters, 8);

        drop(old);
        assert!(router.is_registered("live/cam"));
    }
}
