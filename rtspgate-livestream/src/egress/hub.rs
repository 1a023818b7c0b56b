//! Per-path fan-out between a session's pipeline and its RTSP subscribers.
//!
//! The pipeline owns an [`EgressPublisher`]; each playing RTSP session owns
//! a [`Subscription`] with its own bounded queue. Publishing never waits on
//! a subscriber: a full queue drops the frame for that subscriber only.

use dashmap::DashMap;
use parking_lot::Mutex;
use rtspgate_core::config::EgressConfig;
use rtspgate_core::metrics;
use rtspgate_core::models::SessionCounters;
use rtspgate_media::cache::gop::Gops;
use rtspgate_media::rtsp::sdp::TrackDescription;
use rtspgate_media::EgressFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("no session is mounted at this path")]
    NotFound,
    #[error("the session has not described any track yet")]
    NoTracks,
    #[error("subscriber limit of {0} reached")]
    Full(usize),
}

struct SubscriberSlot {
    id: u64,
    sender: mpsc::Sender<EgressFrame>,
}

struct PathState {
    tracks: Vec<TrackDescription>,
    gops: Gops,
    subscribers: Vec<SubscriberSlot>,
    closed: bool,
}

/// One mounted RTSP path.
pub struct EgressPath {
    path: String,
    session_name: String,
    generation: u64,
    counters: Arc<SessionCounters>,
    state: Mutex<PathState>,
}

impl EgressPath {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    #[must_use]
    pub fn counters(&self) -> &Arc<SessionCounters> {
        &self.counters
    }

    #[must_use]
    pub fn tracks(&self) -> Vec<TrackDescription> {
        self.state.lock().tracks.clone()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn close(&self) -> usize {
        let mut state = self.state.lock();
        state.closed = true;
        state.gops.clear();
        let dropped = state.subscribers.len();
        // dropping the senders ends every subscriber's queue
        state.subscribers.clear();
        dropped
    }

    fn unsubscribe(&self, id: u64) {
        self.state.lock().subscribers.retain(|s| s.id != id);
    }
}

pub struct EgressHub {
    paths: DashMap<String, Arc<EgressPath>>,
    next_generation: AtomicU64,
    next_subscriber: AtomicU64,
    max_subscribers_per_path: usize,
    subscriber_queue: usize,
    gop_cache: usize,
}

impl EgressHub {
    #[must_use]
    pub fn new(config: &EgressConfig) -> Arc<Self> {
        Arc::new(Self {
            paths: DashMap::new(),
            next_generation: AtomicU64::new(0),
            next_subscriber: AtomicU64::new(0),
            max_subscribers_per_path: config.max_subscribers_per_path,
            subscriber_queue: config.subscriber_queue.max(1),
            gop_cache: config.gop_cache,
        })
    }

    /// Mount `path` for a pipeline. An existing mount of the same path is
    /// closed first, disconnecting its subscribers.
    pub fn open(
        self: &Arc<Self>,
        path: &str,
        session_name: &str,
        counters: Arc<SessionCounters>,
    ) -> EgressPublisher {
        let mount = Arc::new(EgressPath {
            path: path.to_string(),
            session_name: session_name.to_string(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            counters,
            state: Mutex::new(PathState {
                tracks: Vec::new(),
                gops: Gops::new(self.gop_cache),
                subscribers: Vec::new(),
                closed: false,
            }),
        });
        if let Some(previous) = self.paths.insert(path.to_string(), Arc::clone(&mount)) {
            let dropped = previous.close();
            debug!(path = %path, dropped, "Egress path replaced");
        }
        info!(path = %path, "Egress path mounted");
        EgressPublisher {
            hub: Arc::downgrade(self),
            mount,
        }
    }

    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<Arc<EgressPath>> {
        self.paths.get(path).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.paths.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Join the fan-out of `path`. The cached GOPs are handed over in
    /// [`Subscription::take_replay`] and precede everything on the queue.
    pub fn subscribe(&self, path: &str) -> Result<Subscription, SubscribeError> {
        let mount = self.lookup(path).ok_or(SubscribeError::NotFound)?;
        let (sender, receiver) = mpsc::channel(self.subscriber_queue);
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);

        let replay: Vec<EgressFrame> = {
            let mut state = mount.state.lock();
            if state.closed {
                return Err(SubscribeError::NotFound);
            }
            if state.tracks.is_empty() {
                return Err(SubscribeError::NoTracks);
            }
            if state.subscribers.len() >= self.max_subscribers_per_path {
                return Err(SubscribeError::Full(self.max_subscribers_per_path));
            }
            state.subscribers.push(SubscriberSlot { id, sender });
            let mut frames = Vec::new();
            for gop in state.gops.get_gops() {
                frames.extend_from_slice(gop.frames());
            }
            frames
        };

        mount.counters.add_viewer();
        metrics::media::EGRESS_SUBSCRIBERS.inc();
        debug!(path = %path, subscriber = id, "Subscriber joined");
        Ok(Subscription {
            id,
            mount,
            replay,
            receiver,
        })
    }

    fn release(&self, path: &str, generation: u64) {
        if let Some((_, mount)) = self
            .paths
            .remove_if(path, |_, mount| mount.generation == generation)
        {
            let dropped = mount.close();
            info!(path = %path, dropped, "Egress path closed");
        }
    }
}

/// Pipeline side of a mounted path; unmounts it on drop.
pub struct EgressPublisher {
    hub: Weak<EgressHub>,
    mount: Arc<EgressPath>,
}

impl EgressPublisher {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.mount.path
    }

    /// Replace the described tracks. Returns `true` when they changed.
    pub fn set_tracks(&self, tracks: Vec<TrackDescription>) -> bool {
        let mut state = self.mount.state.lock();
        if state.tracks == tracks {
            return false;
        }
        state.tracks = tracks;
        true
    }

    /// Hand `frame` to every subscriber. Returns how many queues took it.
    pub fn publish(&self, frame: &EgressFrame) -> usize {
        let counters = &self.mount.counters;
        let mut state = self.mount.state.lock();
        if state.closed {
            return 0;
        }
        state.gops.save_frame(frame.clone());

        let mut delivered = 0;
        state
            .subscribers
            .retain(|subscriber| match subscriber.sender.try_send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    counters.record_drop();
                    metrics::media::DROPPED_FRAMES_TOTAL.inc();
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
        counters.record_frame_out();
        delivered
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.mount.subscriber_count()
    }
}

impl Drop for EgressPublisher {
    fn drop(&mut self) {
        match self.hub.upgrade() {
            Some(hub) => hub.release(&self.mount.path, self.mount.generation),
            None => {
                self.mount.close();
            }
        }
    }
}

/// A playing subscriber's view of a path. Leaving is dropping it.
pub struct Subscription {
    id: u64,
    mount: Arc<EgressPath>,
    replay: Vec<EgressFrame>,
    receiver: mpsc::Receiver<EgressFrame>,
}

impl Subscription {
    #[must_use]
    pub fn path(&self) -> &Arc<EgressPath> {
        &self.mount
    }

    /// Cached frames to send before anything from [`Self::recv`].
    pub fn take_replay(&mut self) -> Vec<EgressFrame> {
        std::mem::take(&mut self.replay)
    }

    /// Next live frame; `None` once the path is closed.
    pub async fn recv(&mut self) -> Option<EgressFrame> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.mount.unsubscribe(self.id);
        self.mount.counters.remove_viewer();
        metrics::media::EGRESS_SUBSCRIBERS.dec();
        debug!(path = %self.mount.path, subscriber = self.id, "Subscriber left");
    }
}
