use super::*;
use crate::models::{HistoryFilter, Resolution, SessionOptions};
use futures::future::BoxFuture;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;

/// Launcher whose pipelines idle until cancelled, tracking how many are
/// alive per session.
#[derive(Default)]
struct MockLauncher {
    auto_activate: bool,
    /// How long a cancelled pipeline keeps running before it exits.
    linger: Duration,
    live: Arc<SyncMutex<HashMap<SessionId, usize>>>,
    launches: AtomicUsize,
    reporters: SyncMutex<Vec<PipelineReporter>>,
}

impl MockLauncher {
    fn activating() -> Arc<Self> {
        Arc::new(Self {
            auto_activate: true,
            ..Self::default()
        })
    }

    fn lingering(linger: Duration) -> Arc<Self> {
        Arc::new(Self {
            auto_activate: true,
            linger,
            ..Self::default()
        })
    }

    fn passive() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn live(&self, id: &SessionId) -> usize {
        self.live.lock().get(id).copied().unwrap_or(0)
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn last_reporter(&self) -> PipelineReporter {
        self.reporters.lock().last().cloned().unwrap()
    }
}

struct LiveGuard {
    live: Arc<SyncMutex<HashMap<SessionId, usize>>>,
    id: SessionId,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        if let Some(n) = self.live.lock().get_mut(&self.id) {
            *n -= 1;
        }
    }
}

impl PipelineLauncher for MockLauncher {
    fn launch(&self, spec: PipelineSpec, reporter: PipelineReporter) -> BoxFuture<'static, ()> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.reporters.lock().push(reporter.clone());
        let live = Arc::clone(&self.live);
        let auto_activate = self.auto_activate;
        let linger = self.linger;
        Box::pin(async move {
            *live.lock().entry(spec.session_id.clone()).or_default() += 1;
            let _guard = LiveGuard {
                live,
                id: spec.session_id.clone(),
            };
            if auto_activate {
                reporter.activated().await;
            }
            spec.cancel.cancelled().await;
            if !linger.is_zero() {
                tokio::time::sleep(linger).await;
            }
        })
    }
}

fn registry_with(launcher: Arc<MockLauncher>, max_sessions: usize) -> Arc<SessionRegistry> {
    let settings = RegistrySettings {
        max_sessions,
        shutdown_timeout: Duration::from_secs(1),
        ..RegistrySettings::default()
    };
    SessionRegistry::new(settings, launcher, Arc::new(HistoryStore::new(100)))
}

fn request(name: &str, key: &str) -> CreateSessionRequest {
    CreateSessionRequest {
        name: name.to_string(),
        ingest_url: format!("rtmp://localhost:1935/live/{key}"),
        profile: Some(EncodingProfile::new(Resolution::new(1920, 1080), 2500, 30)),
        ..CreateSessionRequest::default()
    }
}

async fn wait_for_state(registry: &SessionRegistry, id: &SessionId, state: SessionState) {
    for _ in 0..200 {
        if registry.get(id).await.map(|s| s.state).ok() == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session {id} never reached {state}");
}

async fn wait_for_live(launcher: &MockLauncher, id: &SessionId, expected: usize) {
    for _ in 0..200 {
        if launcher.live(id) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {expected} live pipelines, found {}", launcher.live(id));
}

#[tokio::test]
async fn test_create_starts_pending_with_generated_egress_url() {
    let registry = registry_with(MockLauncher::passive(), 8);
    let session = registry.create(request("Main Camera", "cam")).await.unwrap();

    assert_eq!(session.state, SessionState::Pending);
    assert_eq!(session.egress_url, "rtsp://localhost:8554/maincamera");
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.list().await.len(), 1);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let registry = registry_with(MockLauncher::passive(), 8);
    let id = SessionId::from("missing");

    assert!(matches!(registry.get(&id).await, Err(Error::NotFound(_))));
    assert!(matches!(registry.start(&id).await, Err(Error::NotFound(_))));
    assert!(matches!(registry.stop(&id).await, Err(Error::NotFound(_))));
    assert!(matches!(registry.restart(&id).await, Err(Error::NotFound(_))));
    assert!(matches!(registry.remove(&id).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let launcher = MockLauncher::activating();
    let registry = registry_with(Arc::clone(&launcher), 8);
    let id = registry.create(request("a", "a")).await.unwrap().id;

    let started = registry.start(&id).await.unwrap();
    assert_eq!(started.state, SessionState::Starting);
    wait_for_state(&registry, &id, SessionState::Active).await;

    let again = registry.start(&id).await.unwrap();
    assert_eq!(again.state, SessionState::Active);
    assert_eq!(launcher.launches(), 1);
    wait_for_live(&launcher, &id, 1).await;
}

#[tokio::test]
async fn test_stop_releases_pipeline_and_records_completed_run() {
    let launcher = MockLauncher::activating();
    let registry = registry_with(Arc::clone(&launcher), 8);
    let id = registry.create(request("a", "a")).await.unwrap().id;

    registry.start(&id).await.unwrap();
    wait_for_state(&registry, &id, SessionState::Active).await;

    let stopped = registry.stop(&id).await.unwrap();
    assert_eq!(stopped.state, SessionState::Inactive);
    // stop waits for the pipeline to exit
    assert_eq!(launcher.live(&id), 0);

    let history = registry.history().list(&HistoryFilter::default());
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Completed);
    assert_eq!(history[0].session_id, id);

    // stopping an inactive session is a no-op and records nothing
    let again = registry.stop(&id).await.unwrap();
    assert_eq!(again.state, SessionState::Inactive);
    assert_eq!(registry.history().len(), 1);
}

#[tokio::test]
async fn test_failure_moves_to_error_and_stop_records_error_run() {
    let launcher = MockLauncher::passive();
    let registry = registry_with(Arc::clone(&launcher), 8);
    let id = registry.create(request("a", "a")).await.unwrap().id;
    let mut events = registry.subscribe();

    registry.start(&id).await.unwrap();
    let reporter = launcher.last_reporter();
    reporter
        .failed(Error::PipelineStalled("no frames for 10s".into()))
        .await;

    let failed = registry.get(&id).await.unwrap();
    assert_eq!(failed.state, SessionState::Error);
    let failure = failed.last_error.unwrap();
    assert_eq!(failure.kind, ErrorKind::PipelineStalled);
    wait_for_live(&launcher, &id, 0).await;
    assert!(registry.history().is_empty());

    let starting = events.recv().await.unwrap();
    assert!(matches!(
        starting,
        SessionEvent::StateChanged { to: SessionState::Starting, .. }
    ));
    let errored = events.recv().await.unwrap();
    assert_eq!(
        errored,
        SessionEvent::StateChanged {
            session_id: id.clone(),
            from: SessionState::Starting,
            to: SessionState::Error,
            reason: Some(ErrorKind::PipelineStalled),
            epoch: 1,
        }
    );

    registry.stop(&id).await.unwrap();
    let history = registry.history().list(&HistoryFilter::default());
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Error);
    assert!(history[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("no frames"));
}

#[tokio::test]
async fn test_reports_from_superseded_pipeline_are_ignored() {
    let launcher = MockLauncher::passive();
    let registry = registry_with(Arc::clone(&launcher), 8);
    let id = registry.create(request("a", "a")).await.unwrap().id;

    registry.start(&id).await.unwrap();
    let stale = launcher.last_reporter();
    let restarted = registry.restart(&id).await.unwrap();
    assert_eq!(restarted.state, SessionState::Starting);
    assert_eq!(restarted.restart_count, 1);

    stale.failed(Error::EndpointUnreachable("gone".into())).await;
    stale.activated().await;
    assert_eq!(registry.get(&id).await.unwrap().state, SessionState::Starting);

    launcher.last_reporter().activated().await;
    assert_eq!(registry.get(&id).await.unwrap().state, SessionState::Active);
    wait_for_live(&launcher, &id, 1).await;
}

#[tokio::test]
async fn test_restart_of_pending_session_starts_it() {
    let launcher = MockLauncher::activating();
    let registry = registry_with(Arc::clone(&launcher), 8);
    let id = registry.create(request("a", "a")).await.unwrap().id;

    let session = registry.restart(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Starting);
    assert_eq!(session.restart_count, 0);
    wait_for_state(&registry, &id, SessionState::Active).await;
}

#[tokio::test]
async fn test_retry_failed_only_acts_on_matching_failure() {
    let launcher = MockLauncher::passive();
    let registry = registry_with(Arc::clone(&launcher), 8);
    let id = registry.create(request("a", "a")).await.unwrap().id;

    registry.start(&id).await.unwrap();
    let reporter = launcher.last_reporter();
    reporter.failed(Error::PipelineStalled("stall".into())).await;

    assert!(registry.retry_failed(&id, 99).await.unwrap().is_none());
    let retried = registry.retry_failed(&id, reporter.epoch()).await.unwrap();
    assert_eq!(retried.unwrap().state, SessionState::Starting);
    // the retry moved the session on, so a duplicate retry is a no-op
    assert!(registry
        .retry_failed(&id, reporter.epoch())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_remove_running_session_records_terminated_run() {
    let launcher = MockLauncher::activating();
    let registry = registry_with(Arc::clone(&launcher), 8);
    let id = registry.create(request("a", "a")).await.unwrap().id;
    registry.start(&id).await.unwrap();
    wait_for_state(&registry, &id, SessionState::Active).await;

    let removed = registry.remove(&id).await.unwrap();
    assert_eq!(removed.state, SessionState::Removed);
    assert_eq!(launcher.live(&id), 0);
    assert!(matches!(registry.get(&id).await, Err(Error::NotFound(_))));

    let history = registry.history().list(&HistoryFilter::default());
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Terminated);

    // the ingest and egress paths are free again
    registry.create(request("a", "a")).await.unwrap();
}

#[tokio::test]
async fn test_stop_racing_remove_reports_removed_session() {
    let launcher = MockLauncher::lingering(Duration::from_millis(200));
    let registry = registry_with(Arc::clone(&launcher), 8);
    let id = registry.create(request("Cam", "cam")).await.unwrap().id;
    registry.start(&id).await.unwrap();
    wait_for_state(&registry, &id, SessionState::Active).await;

    let stopping = {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        tokio::spawn(async move { registry.stop(&id).await })
    };
    wait_for_state(&registry, &id, SessionState::Stopping).await;
    registry.remove(&id).await.unwrap();

    let stopped = stopping.await.unwrap().unwrap();
    assert_eq!(stopped.state, SessionState::Removed);
    let records = registry.history().list(&HistoryFilter::default());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, HistoryStatus::Terminated);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_remove_idle_session_records_nothing() {
    let registry = registry_with(MockLauncher::passive(), 8);
    let id = registry.create(request("a", "a")).await.unwrap().id;

    registry.remove(&id).await.unwrap();
    assert!(registry.history().is_empty());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_capacity_cap_rejects_creation() {
    let registry = registry_with(MockLauncher::passive(), 2);
    let first = registry.create(request("a", "a")).await.unwrap();
    registry.create(request("b", "b")).await.unwrap();

    let err = registry.create(request("c", "c")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

    registry.remove(&first.id).await.unwrap();
    registry.create(request("c", "c")).await.unwrap();
}

#[tokio::test]
async fn test_closed_admission_gate_rejects_creation() {
    let registry = registry_with(MockLauncher::passive(), 8);
    registry.admission().close("cpu at 97%");

    let err = registry.create(request("a", "a")).await.unwrap_err();
    assert!(matches!(err, Error::ResourceExhausted(ref m) if m.contains("cpu")));

    registry.admission().open();
    registry.create(request("a", "a")).await.unwrap();
}

#[tokio::test]
async fn test_duplicate_paths_rejected() {
    let registry = registry_with(MockLauncher::passive(), 8);
    registry.create(request("first", "key")).await.unwrap();

    let same_ingest = registry.create(request("second", "key")).await.unwrap_err();
    assert_eq!(same_ingest.kind(), ErrorKind::AlreadyExists);

    let same_egress = registry.create(request("first", "other")).await.unwrap_err();
    assert_eq!(same_egress.kind(), ErrorKind::AlreadyExists);

    // the rejected request did not leak its ingest claim
    registry.create(request("third", "other")).await.unwrap();
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_profile_resolution() {
    let registry = registry_with(MockLauncher::passive(), 8);

    let from_preset = registry
        .create(CreateSessionRequest {
            preset: Some("balanced".to_string()),
            profile: None,
            ..request("preset", "preset")
        })
        .await
        .unwrap();
    assert_eq!(from_preset.profile.resolution, Resolution::new(1280, 720));

    let unknown = registry
        .create(CreateSessionRequest {
            preset: Some("ultra".to_string()),
            profile: None,
            ..request("unknown", "unknown")
        })
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::ConfigurationInvalid);

    let invalid = registry
        .create(CreateSessionRequest {
            profile: Some(EncodingProfile::new(Resolution::new(1920, 1080), 2500, 0)),
            ..request("invalid", "invalid")
        })
        .await
        .unwrap_err();
    assert_eq!(invalid.kind(), ErrorKind::ConfigurationInvalid);

    let bad_url = registry
        .create(CreateSessionRequest {
            ingest_url: "http://localhost/live/x".to_string(),
            ..request("bad", "bad")
        })
        .await
        .unwrap_err();
    assert_eq!(bad_url.kind(), ErrorKind::ConfigurationInvalid);
    // rejected creates hold no capacity
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_state_and_pipeline_presence_stay_consistent() {
    let launcher = MockLauncher::activating();
    let registry = registry_with(Arc::clone(&launcher), 8);
    let mut ids = Vec::new();
    for n in 0..4 {
        let session = registry
            .create(CreateSessionRequest {
                options: SessionOptions::default(),
                ..request(&format!("s{n}"), &format!("k{n}"))
            })
            .await
            .unwrap();
        ids.push(session.id);
    }

    let commands = ["start", "restart", "stop", "start", "restart", "restart", "stop", "start"];
    let tasks = ids.iter().enumerate().map(|(offset, id)| {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        async move {
            for command in commands.iter().skip(offset) {
                let _ = match *command {
                    "start" => registry.start(&id).await,
                    "restart" => registry.restart(&id).await,
                    _ => registry.stop(&id).await,
                };
            }
        }
    });
    futures::future::join_all(tasks).await;

    for id in &ids {
        let session = registry.get(id).await.unwrap();
        let expected = usize::from(session.state.is_running());
        wait_for_live(&launcher, id, expected).await;
    }
    // every run that reached a terminal state left exactly one record
    let finished_runs: usize = (0..ids.len())
        .map(|offset| {
            let mut running = false;
            let mut finished = 0;
            for command in commands.iter().skip(offset) {
                match *command {
                    "stop" if running => {
                        running = false;
                        finished += 1;
                    }
                    "stop" => {}
                    _ => running = true,
                }
            }
            finished
        })
        .sum();
    assert_eq!(registry.history().len(), finished_runs);
}
