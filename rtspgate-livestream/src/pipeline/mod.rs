//! Per-session pipeline units.
//!
//! A unit claims its session's ingest path and mounts its egress path, waits
//! for a publisher, then repackages every frame onto the egress fan-out.
//! Sessions never share a unit, a channel or a task.

mod repackager;
mod transcoder;

pub use repackager::{Repackaged, Repackager};
pub use transcoder::{transcoder_for, Passthrough, Transcoder};

use futures::future::BoxFuture;
use rtspgate_core::config::PipelineConfig;
use rtspgate_core::models::SessionCounters;
use rtspgate_core::{Error, PipelineLauncher, PipelineReporter, PipelineSpec, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::egress::EgressHub;
use crate::ingest::IngestRouter;

const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Launches [`PipelineUnit`]s wired to the shared ingest router and egress
/// hub.
pub struct GatewayLauncher {
    router: Arc<IngestRouter>,
    hub: Arc<EgressHub>,
    buffer_frames: usize,
    stall_timeout: Duration,
}

impl GatewayLauncher {
    #[must_use]
    pub fn new(router: Arc<IngestRouter>, hub: Arc<EgressHub>, config: &PipelineConfig) -> Self {
        Self {
            router,
            hub,
            buffer_frames: config.buffer_frames,
            stall_timeout: config.stall_timeout(),
        }
    }
}

impl PipelineLauncher for GatewayLauncher {
    fn launch(&self, spec: PipelineSpec, reporter: PipelineReporter) -> BoxFuture<'static, ()> {
        let unit = PipelineUnit {
            router: Arc::clone(&self.router),
            hub: Arc::clone(&self.hub),
            buffer_frames: self.buffer_frames,
            stall_timeout: self.stall_timeout,
            spec,
        };
        Box::pin(unit.run(reporter))
    }
}

struct PipelineUnit {
    router: Arc<IngestRouter>,
    hub: Arc<EgressHub>,
    buffer_frames: usize,
    stall_timeout: Duration,
    spec: PipelineSpec,
}

impl PipelineUnit {
    async fn run(self, reporter: PipelineReporter) {
        match self.drive(&reporter).await {
            Ok(()) => debug!("Pipeline cancelled"),
            Err(e) => reporter.failed(e).await,
        }
    }

    /// Returns `Ok` only when cancelled. Ingest and egress registrations are
    /// released when this returns.
    async fn drive(&self, reporter: &PipelineReporter) -> Result<()> {
        let spec = &self.spec;
        let stall_ms = self.stall_timeout.as_millis() as u64;
        let mut registration = self.router.register(
            &spec.ingest_path,
            Arc::clone(&spec.counters),
            self.buffer_frames,
        );
        let publisher = self
            .hub
            .open(&spec.egress_path, &spec.name, Arc::clone(&spec.counters));
        info!(
            ingest_path = %spec.ingest_path,
            egress_path = %spec.egress_path,
            "Pipeline waiting for publisher"
        );

        let feed = tokio::select! {
            biased;
            () = spec.cancel.cancelled() => return Ok(()),
            feed = tokio::time::timeout(self.stall_timeout, registration.next_publisher()) => match feed {
                Ok(Some(feed)) => feed,
                Ok(None) => {
                    return Err(Error::Internal(format!(
                        "ingest path {} was claimed by another pipeline",
                        spec.ingest_path
                    )))
                }
                Err(_) => {
                    return Err(Error::PipelineStalled(format!(
                        "no publisher on {} within {stall_ms} ms",
                        spec.ingest_path
                    )))
                }
            },
        };

        let mut frames = feed.frames;
        let mut repackager = Repackager::new(transcoder_for(&spec.profile), spec.options.enable_audio);
        let mut rates = RateMeter::new(Instant::now());
        let mut activated = false;
        let mut demux_errors: u64 = 0;

        loop {
            let frame = tokio::select! {
                biased;
                () = spec.cancel.cancelled() => return Ok(()),
                next = tokio::time::timeout(self.stall_timeout, frames.recv()) => match next {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        return Err(Error::EndpointUnreachable(format!(
                            "publisher on {} disconnected",
                            spec.ingest_path
                        )))
                    }
                    Err(_) => {
                        return Err(Error::PipelineStalled(format!(
                            "no media on {} for {stall_ms} ms",
                            spec.ingest_path
                        )))
                    }
                },
            };

            spec.counters.record_ingest(frame.len());
            rates.record_ingest(frame.len());
            if !activated {
                activated = true;
                reporter.activated().await;
            }

            match repackager.push(frame) {
                Ok(Repackaged::Frame(frame)) => {
                    if matches!(frame, rtspgate_media::EgressFrame::Video { .. }) {
                        rates.record_video_frame();
                    }
                    publisher.publish(&frame);
                }
                Ok(Repackaged::TracksChanged) => {
                    publisher.set_tracks(repackager.tracks());
                }
                Ok(Repackaged::Nothing) => {}
                Err(e) => {
                    demux_errors += 1;
                    debug!(error = %e, demux_errors, "Skipping undecodable tag");
                }
            }

            rates.update(Instant::now(), &spec.counters);
        }
    }
}

/// Ingest bitrate and output frame rate over one-second windows.
struct RateMeter {
    window_start: Instant,
    bytes: u64,
    video_frames: u64,
}

impl RateMeter {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            bytes: 0,
            video_frames: 0,
        }
    }

    fn record_ingest(&mut self, bytes: usize) {
        self.bytes += bytes as u64;
    }

    fn record_video_frame(&mut self) {
        self.video_frames += 1;
    }

    fn update(&mut self, now: Instant, counters: &SessionCounters) {
        let elapsed = now.duration_since(self.window_start);
        if elapsed < RATE_WINDOW {
            return;
        }
        let secs = elapsed.as_secs_f64();
        let kbps = (self.bytes as f64 * 8.0 / 1000.0 / secs) as u64;
        let fps = self.video_frames as f64 / secs;
        counters.set_rates(kbps, fps);
        *self = Self::new(now);
    }
}


#[cfg(test)]
mod tests {
    use super::test_tags::*;
    use super::*;
    use rtspgate_core::config::{Config, EgressConfig};
    use rtspgate_core::history::HistoryStore;
    use rtspgate_core::models::{
        CreateSessionRequest, EncodingProfile, HistoryFilter, HistoryStatus, Resolution,
        SessionId, SessionOptions, SessionState,
    };
    use rtspgate_core::{ErrorKind, RegistrySettings, SessionRegistry};
    use rtspgate_media::rtmp::session::{MediaSink, PublishHandler};
    use rtspgate_media::MediaFrame;

    struct Harness {
        registry: Arc<SessionRegistry>,
        router: Arc<IngestRouter>,
        hub: Arc<EgressHub>,
    }

    fn harness(stall_timeout_ms: u64) -> Harness {
        let mut config = Config::default();
        config.pipeline.stall_timeout_ms = stall_timeout_ms;
        let router = IngestRouter::new();
        let hub = EgressHub::new(&EgressConfig::default());
        let launcher = GatewayLauncher::new(Arc::clone(&router), Arc::clone(&hub), &config.pipeline);
        let registry = SessionRegistry::new(
            RegistrySettings::from_config(&config),
            Arc::new(launcher),
            Arc::new(HistoryStore::new(100)),
        );
        Harness {
            registry,
            router,
            hub,
        }
    }

    async fn create(registry: &SessionRegistry, enable_audio: bool) -> SessionId {
        registry
            .create(CreateSessionRequest {
                name: "Camera".to_string(),
                ingest_url: "rtmp://localhost/live/cam".to_string(),
                profile: Some(EncodingProfile::new(Resolution::new(1920, 1080), 2500, 30)),
                options: SessionOptions {
                    enable_audio,
                    auto_restart: false,
                },
                ..CreateSessionRequest::default()
            })
            .await
            .unwrap()
            .id
    }

    async fn wait_for_state(registry: &SessionRegistry, id: &SessionId, state: SessionState) {
        for _ in 0..200 {
            if registry.get(id).await.unwrap().state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never reached {state}");
    }

    async fn publish(router: &Arc<IngestRouter>) -> Box<dyn MediaSink> {
        for _ in 0..200 {
            if router.is_registered("live/cam") {
                return router.on_publish("live", "cam").await.unwrap();
            }
            tokio::task::yield_now().await;
        }
        panic!("pipeline never registered its ingest path");
    }

    async fn push_all(sink: &mut Box<dyn MediaSink>, frames: Vec<MediaFrame>) {
        for frame in frames {
            assert!(sink.push(frame).await);
        }
    }

    #[tokio::test]
    async fn test_first_frame_activates_and_tracks_reach_egress() {
        let h = harness(5_000);
        let id = create(&h.registry, true).await;
        h.registry.start(&id).await.unwrap();

        let mut sink = publish(&h.router).await;
        push_all(
            &mut sink,
            vec![
                video_header(0),
                audio_header(0),
                video_keyframe(0),
                audio_frame(23),
                video_interframe(40),
            ],
        )
        .await;
        wait_for_state(&h.registry, &id, SessionState::Active).await;
        for _ in 0..200 {
            if h.registry.get(&id).await.unwrap().metrics.frames_in == 5 {
                break;
            }
            tokio::task::yield_now().await;
        }

        let mount = h.hub.lookup("camera").unwrap();
        assert_eq!(mount.tracks().len(), 2);
        let mut subscription = h.hub.subscribe("camera").unwrap();
        let replay = subscription.take_replay();
        assert_eq!(replay.len(), 3);
        assert!(replay[0].is_key_frame());

        let session = h.registry.get(&id).await.unwrap();
        assert_eq!(session.metrics.frames_in, 5);
        assert_eq!(session.metrics.viewers, 1);
    }

    #[tokio::test]
    async fn test_publisher_disconnect_is_endpoint_unreachable() {
        let h = harness(5_000);
        let id = create(&h.registry, true).await;
        h.registry.start(&id).await.unwrap();

        let mut sink = publish(&h.router).await;
        push_all(&mut sink, vec![video_header(0)]).await;
        wait_for_state(&h.registry, &id, SessionState::Active).await;
        drop(sink);

        wait_for_state(&h.registry, &id, SessionState::Error).await;
        let session = h.registry.get(&id).await.unwrap();
        assert_eq!(
            session.last_error.map(|f| f.kind),
            Some(ErrorKind::EndpointUnreachable)
        );
        // the failed pipeline released both endpoints
        for _ in 0..200 {
            if !h.router.is_registered("live/cam") && h.hub.lookup("camera").is_none() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("endpoints were not released");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_publisher_stalls() {
        let h = harness(1_000);
        let id = create(&h.registry, true).await;
        h.registry.start(&id).await.unwrap();

        wait_for_state(&h.registry, &id, SessionState::Error).await;
        let session = h.registry.get(&id).await.unwrap();
        assert_eq!(session.last_error.map(|f| f.kind), Some(ErrorKind::PipelineStalled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_stream_stall() {
        let h = harness(1_000);
        let id = create(&h.registry, true).await;
        h.registry.start(&id).await.unwrap();

        let mut sink = publish(&h.router).await;
        push_all(&mut sink, vec![video_header(0), video_keyframe(0)]).await;
        wait_for_state(&h.registry, &id, SessionState::Active).await;

        // publisher stays connected but goes quiet
        wait_for_state(&h.registry, &id, SessionState::Error).await;
        let session = h.registry.get(&id).await.unwrap();
        assert_eq!(session.last_error.map(|f| f.kind), Some(ErrorKind::PipelineStalled));
        drop(sink);
    }

    #[tokio::test]
    async fn test_stop_closes_egress_and_ingest() {
        let h = harness(5_000);
        let id = create(&h.registry, false).await;
        h.registry.start(&id).await.unwrap();

        let mut sink = publish(&h.router).await;
        push_all(&mut sink, vec![video_header(0), video_keyframe(0)]).await;
        wait_for_state(&h.registry, &id, SessionState::Active).await;

        let stopped = h.registry.stop(&id).await.unwrap();
        assert_eq!(stopped.state, SessionState::Inactive);
        assert!(h.hub.lookup("camera").is_none());
        assert!(!h.router.is_registered("live/cam"));
        // the pipeline is gone, so the publisher's next frame ends its connection
        assert!(!sink.push(video_interframe(40)).await);
    }

    #[tokio::test]
    async fn test_remove_disconnects_subscribers_and_frees_endpoints() {
        let h = harness(5_000);
        let id = create(&h.registry, false).await;
        h.registry.start(&id).await.unwrap();

        let mut sink = publish(&h.router).await;
        push_all(&mut sink, vec![video_header(0), video_keyframe(0)]).await;
        wait_for_state(&h.registry, &id, SessionState::Active).await;
        let mut subscription = h.hub.subscribe("camera").unwrap();

        let removed = h.registry.remove(&id).await.unwrap();
        assert_eq!(removed.state, SessionState::Removed);

        let ended = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .unwrap();
        assert!(ended.is_none());
        assert!(h.hub.lookup("camera").is_none());
        assert!(!h.router.is_registered("live/cam"));
        let statuses: Vec<HistoryStatus> = h
            .registry
            .history()
            .list(&HistoryFilter::default())
            .iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(statuses, vec![HistoryStatus::Terminated]);
    }

    #[test]
    fn test_rate_meter_window() {
        let counters = SessionCounters::default();
        let start = Instant::now();
        let mut meter = RateMeter::new(start);
        meter.record_ingest(125_000);
        for _ in 0..30 {
            meter.record_video_frame();
        }
        meter.update(start + Duration::from_millis(500), &counters);
        assert_eq!(counters.snapshot(0).ingest_kbps, 0);

        meter.update(start + Duration::from_secs(1), &counters);
        let snapshot = counters.snapshot(0);
        assert_eq!(snapshot.ingest_kbps, 1000);
        assert!((snapshot.output_fps - 30.0).abs() < 0.01);
    }
}
