//! Session Registry: the single owner of every session and its lifecycle.
//!
//! Each session lives in a slot guarded by its own async mutex, so commands
//! against one session are serialized while different sessions proceed in
//! parallel. A pipeline handle is installed or removed under the same lock
//! as the state write: a session is `starting`/`active` exactly when it
//! holds a live pipeline.

mod admission;
mod launcher;

#[cfg(test)]
mod tests;

pub use admission::AdmissionGate;
pub use launcher::{PipelineLauncher, PipelineReporter, PipelineSpec};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::history::HistoryStore;
use crate::metrics;
use crate::models::{
    builtin_presets, egress_path, ingest_path, slugify, CreateSessionRequest, EncodingProfile,
    HistoryRecord, HistoryStatus, Preset, Session, SessionCounters, SessionFailure, SessionId,
    SessionMetrics, SessionState,
};
use launcher::PipelineHandle;

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub max_sessions: usize,
    pub shutdown_timeout: Duration,
    pub egress_public_host: String,
    pub egress_public_port: u16,
    pub presets: Vec<Preset>,
    pub event_capacity: usize,
}

impl RegistrySettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut presets = builtin_presets();
        for preset in &config.presets {
            presets.retain(|p| p.name != preset.name);
            presets.push(preset.clone());
        }
        Self {
            max_sessions: config.supervisor.max_sessions,
            shutdown_timeout: config.pipeline.shutdown_timeout(),
            egress_public_host: config.egress.public_host.clone(),
            egress_public_port: config.egress.public_port.unwrap_or(config.egress.port),
            presets,
            event_capacity: 1024,
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
        /// Failure kind when `to` is `error`.
        reason: Option<ErrorKind>,
        epoch: u64,
    },
}

struct RunInfo {
    started_at: DateTime<Utc>,
    /// State the run was in when stop was requested.
    stop_from: Option<SessionState>,
}

struct SessionRecord {
    session: Session,
    pipeline: Option<PipelineHandle>,
    /// Pipeline that was cancelled but may still be winding down. The next
    /// pipeline waits for it before touching the session's endpoints.
    retired: Option<PipelineHandle>,
    epoch: u64,
    run: Option<RunInfo>,
}

struct SessionSlot {
    id: SessionId,
    ingest_path: String,
    egress_path: String,
    counters: Arc<SessionCounters>,
    record: Mutex<SessionRecord>,
}

pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionSlot>>,
    ingest_paths: DashMap<String, SessionId>,
    egress_paths: DashMap<String, SessionId>,
    session_count: AtomicUsize,
    launcher: Arc<dyn PipelineLauncher>,
    history: Arc<HistoryStore>,
    admission: AdmissionGate,
    events: broadcast::Sender<SessionEvent>,
    settings: RegistrySettings,
    self_ref: Weak<SessionRegistry>,
}

fn not_found(id: &SessionId) -> Error {
    Error::NotFound(format!("session {id}"))
}

impl SessionRegistry {
    pub fn new(
        settings: RegistrySettings,
        launcher: Arc<dyn PipelineLauncher>,
        history: Arc<HistoryStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_capacity.max(16));
        Arc::new_cyclic(|self_ref| Self {
            sessions: DashMap::new(),
            ingest_paths: DashMap::new(),
            egress_paths: DashMap::new(),
            session_count: AtomicUsize::new(0),
            launcher,
            history,
            admission: AdmissionGate::new(),
            events,
            settings,
            self_ref: self_ref.clone(),
        })
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn admission(&self) -> &AdmissionGate {
        &self.admission
    }

    #[must_use]
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    #[must_use]
    pub fn presets(&self) -> &[Preset] {
        &self.settings.presets
    }

    #[must_use]
    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Registered (non-removed) sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.session_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: &SessionId) -> Result<Arc<SessionSlot>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| not_found(id))
    }

    fn resolve_profile(
        &self,
        profile: Option<EncodingProfile>,
        preset: Option<&str>,
    ) -> Result<EncodingProfile> {
        let profile = match (profile, preset) {
            (Some(profile), _) => profile,
            (None, Some(name)) => {
                self.settings
                    .presets
                    .iter()
                    .find(|p| p.name == name)
                    .ok_or_else(|| Error::ConfigurationInvalid(format!("unknown preset {name:?}")))?
                    .profile
            }
            (None, None) => {
                return Err(Error::ConfigurationInvalid(
                    "either a profile or a preset is required".to_string(),
                ))
            }
        };
        profile.validate()?;
        Ok(profile)
    }

    fn reserve_capacity(&self) -> Result<()> {
        let max = self.settings.max_sessions;
        self.session_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .map(|_| ())
            .map_err(|_| Error::ResourceExhausted(format!("session limit of {max} reached")))
    }

    fn release_capacity(&self) {
        let _ = self
            .session_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Register a new session in `pending`.
    pub async fn create(&self, request: CreateSessionRequest) -> Result<Session> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::ConfigurationInvalid(
                "session name must not be empty".to_string(),
            ));
        }
        let ingest = ingest_path(&request.ingest_url)?;
        let egress_url = match request.egress_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => url,
            None => {
                let slug = slugify(&name);
                if slug.is_empty() {
                    return Err(Error::ConfigurationInvalid(format!(
                        "cannot derive an egress path from name {name:?}"
                    )));
                }
                format!(
                    "rtsp://{}:{}/{slug}",
                    self.settings.egress_public_host, self.settings.egress_public_port
                )
            }
        };
        let egress = egress_path(&egress_url)?;
        let profile = self.resolve_profile(request.profile, request.preset.as_deref())?;

        if !self.admission.is_open() {
            return Err(Error::ResourceExhausted(
                self.admission
                    .reason()
                    .unwrap_or_else(|| "capacity cap reached".to_string()),
            ));
        }
        self.reserve_capacity()?;

        let id = SessionId::new();
        if let Err(e) = self.claim_paths(&id, &ingest, &egress) {
            self.release_capacity();
            return Err(e);
        }

        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            name,
            description: request.description.filter(|d| !d.trim().is_empty()),
            ingest_url: request.ingest_url,
            egress_url,
            profile,
            options: request.options,
            state: SessionState::Pending,
            last_error: None,
            retries_exhausted: false,
            restart_count: 0,
            created_at: now,
            started_at: None,
            updated_at: now,
            metrics: SessionMetrics::default(),
        };
        let slot = Arc::new(SessionSlot {
            id: id.clone(),
            ingest_path: ingest,
            egress_path: egress,
            counters: Arc::new(SessionCounters::default()),
            record: Mutex::new(SessionRecord {
                session: session.clone(),
                pipeline: None,
                retired: None,
                epoch: 0,
                run: None,
            }),
        });
        self.sessions.insert(id.clone(), slot);
        metrics::sessions::BY_STATE
            .with_label_values(&[SessionState::Pending.as_str()])
            .inc();

        info!(
            session_id = %id,
            name = %session.name,
            ingest = %session.ingest_url,
            egress = %session.egress_url,
            profile = %session.profile.resolution,
            "Session created"
        );
        Ok(session)
    }

    fn claim_paths(&self, id: &SessionId, ingest: &str, egress: &str) -> Result<()> {
        match self.ingest_paths.entry(ingest.to_string()) {
            Entry::Occupied(_) => {
                return Err(Error::AlreadyExists(format!(
                    "ingest path {ingest} is used by another session"
                )))
            }
            Entry::Vacant(v) => {
                v.insert(id.clone());
            }
        }
        match self.egress_paths.entry(egress.to_string()) {
            Entry::Occupied(_) => {
                self.ingest_paths.remove(ingest);
                Err(Error::AlreadyExists(format!(
                    "egress path {egress} is used by another session"
                )))
            }
            Entry::Vacant(v) => {
                v.insert(id.clone());
                Ok(())
            }
        }
    }

    pub async fn get(&self, id: &SessionId) -> Result<Session> {
        let slot = self.slot(id)?;
        let record = slot.record.lock().await;
        if record.session.state == SessionState::Removed {
            return Err(not_found(id));
        }
        Ok(Self::snapshot(&slot, &record))
    }

    /// Snapshots of every session, oldest first.
    pub async fn list(&self) -> Vec<Session> {
        let slots: Vec<Arc<SessionSlot>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut sessions = Vec::with_capacity(slots.len());
        for slot in slots {
            let record = slot.record.lock().await;
            if record.session.state != SessionState::Removed {
                sessions.push(Self::snapshot(&slot, &record));
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Launch a pipeline. Already starting or active sessions are left as
    /// they are.
    pub async fn start(&self, id: &SessionId) -> Result<Session> {
        let slot = self.slot(id)?;
        let mut record = slot.record.lock().await;
        match record.session.state {
            SessionState::Removed => return Err(not_found(id)),
            SessionState::Starting | SessionState::Active => {
                debug!(session_id = %id, state = %record.session.state, "Start ignored, already running");
                return Ok(Self::snapshot(&slot, &record));
            }
            SessionState::Stopping => {
                return Err(Error::InvalidState(format!("session {id} is stopping")))
            }
            SessionState::Pending | SessionState::Inactive => Self::begin_run(&slot, &mut record),
            SessionState::Error => Self::count_restart(&mut record),
        }
        self.launch(&slot, &mut record);
        Ok(Self::snapshot(&slot, &record))
    }

    /// Cancel the running pipeline and launch a fresh one.
    pub async fn restart(&self, id: &SessionId) -> Result<Session> {
        let slot = self.slot(id)?;
        let mut record = slot.record.lock().await;
        self.restart_locked(&slot, &mut record)?;
        Ok(Self::snapshot(&slot, &record))
    }

    /// Supervisor entry point: restart only if the session is still in the
    /// failure the retry was scheduled for.
    pub async fn retry_failed(&self, id: &SessionId, epoch: u64) -> Result<Option<Session>> {
        let slot = self.slot(id)?;
        let mut record = slot.record.lock().await;
        if record.session.state != SessionState::Error || record.epoch != epoch {
            return Ok(None);
        }
        self.restart_locked(&slot, &mut record)?;
        Ok(Some(Self::snapshot(&slot, &record)))
    }

    fn restart_locked(&self, slot: &Arc<SessionSlot>, record: &mut SessionRecord) -> Result<()> {
        match record.session.state {
            SessionState::Removed => return Err(not_found(&slot.id)),
            SessionState::Stopping => {
                return Err(Error::InvalidState(format!("session {} is stopping", slot.id)))
            }
            SessionState::Pending | SessionState::Inactive => Self::begin_run(slot, record),
            SessionState::Starting | SessionState::Active | SessionState::Error => {
                if let Some(old) = record.pipeline.take() {
                    old.cancel.cancel();
                    record.retired = Some(old);
                }
                Self::count_restart(record);
            }
        }
        info!(session_id = %slot.id, restart_count = record.session.restart_count, "Restarting session");
        self.launch(slot, record);
        Ok(())
    }

    /// Mark the session as given up on by the Supervisor.
    pub async fn mark_retries_exhausted(&self, id: &SessionId, epoch: u64) -> Result<()> {
        let slot = self.slot(id)?;
        let mut record = slot.record.lock().await;
        if record.session.state == SessionState::Error && record.epoch == epoch {
            record.session.retries_exhausted = true;
            record.session.updated_at = Utc::now();
            metrics::sessions::RETRIES_EXHAUSTED_TOTAL.inc();
            warn!(session_id = %id, restart_count = record.session.restart_count, "Restart budget exhausted, session stays in error");
        }
        Ok(())
    }

    /// Stop the pipeline, wait for it to release its endpoints and record
    /// the finished run.
    pub async fn stop(&self, id: &SessionId) -> Result<Session> {
        let slot = self.slot(id)?;
        let draining = {
            let mut record = slot.record.lock().await;
            match record.session.state {
                SessionState::Removed => return Err(not_found(id)),
                SessionState::Pending | SessionState::Inactive => {
                    return Ok(Self::snapshot(&slot, &record))
                }
                SessionState::Stopping => {
                    return Err(Error::InvalidState(format!("session {id} is already stopping")))
                }
                SessionState::Starting | SessionState::Active | SessionState::Error => {}
            }
            let from = record.session.state;
            if let Some(run) = record.run.as_mut() {
                run.stop_from = Some(from);
            }
            let draining: Vec<PipelineHandle> = record
                .pipeline
                .iter()
                .chain(record.retired.iter())
                .cloned()
                .collect();
            for handle in &draining {
                handle.cancel.cancel();
            }
            self.transition(&slot, &mut record, SessionState::Stopping);
            draining
        };

        for handle in &draining {
            handle.drain(self.settings.shutdown_timeout).await;
        }

        let mut record = slot.record.lock().await;
        if record.session.state != SessionState::Stopping {
            // removed while draining; removal already recorded the run
            return Ok(Self::snapshot(&slot, &record));
        }
        record.pipeline = None;
        record.retired = None;
        self.transition(&slot, &mut record, SessionState::Inactive);
        let status = match record.run.as_ref().and_then(|r| r.stop_from) {
            Some(SessionState::Active) => HistoryStatus::Completed,
            Some(SessionState::Error) => HistoryStatus::Error,
            _ => HistoryStatus::Terminated,
        };
        self.finish_run(&slot, &mut record, status);
        Ok(Self::snapshot(&slot, &record))
    }

    /// Drop the session entirely, cancelling any pipeline it still holds.
    pub async fn remove(&self, id: &SessionId) -> Result<Session> {
        let slot = self.slot(id)?;
        let (draining, snapshot) = {
            let mut record = slot.record.lock().await;
            if record.session.state == SessionState::Removed {
                return Err(not_found(id));
            }
            let draining: Vec<PipelineHandle> = record
                .pipeline
                .take()
                .into_iter()
                .chain(record.retired.take())
                .collect();
            for handle in &draining {
                handle.cancel.cancel();
            }
            self.transition(&slot, &mut record, SessionState::Removed);
            self.finish_run(&slot, &mut record, HistoryStatus::Terminated);
            (draining, Self::snapshot(&slot, &record))
        };

        self.sessions.remove(id);
        self.ingest_paths.remove(&slot.ingest_path);
        self.egress_paths.remove(&slot.egress_path);
        self.release_capacity();
        info!(session_id = %id, "Session removed");

        for handle in &draining {
            handle.drain(self.settings.shutdown_timeout).await;
        }
        Ok(snapshot)
    }

    /// Stop every running or failed session. Used on shutdown.
    pub async fn stop_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let stops = ids.iter().map(|id| async move {
            if let Err(e) = self.stop(id).await {
                debug!(session_id = %id, error = %e, "Stop during shutdown skipped");
            }
        });
        futures::future::join_all(stops).await;
    }

    pub(crate) async fn on_activated(&self, id: &SessionId, epoch: u64) {
        let Ok(slot) = self.slot(id) else { return };
        let mut record = slot.record.lock().await;
        if record.epoch != epoch || record.session.state != SessionState::Starting {
            return;
        }
        record.session.last_error = None;
        record.session.retries_exhausted = false;
        self.transition(&slot, &mut record, SessionState::Active);
    }

    pub(crate) async fn on_failed(&self, id: &SessionId, epoch: u64, error: Error) {
        let Ok(slot) = self.slot(id) else { return };
        let mut record = slot.record.lock().await;
        if record.epoch != epoch || !record.session.state.is_running() {
            debug!(session_id = %id, epoch, error = %error, "Ignoring failure from superseded pipeline");
            return;
        }
        warn!(session_id = %id, kind = %error.kind(), error = %error, "Pipeline failed");
        record.session.last_error = Some(SessionFailure::from_error(&error));
        if let Some(handle) = record.pipeline.take() {
            handle.cancel.cancel();
            record.retired = Some(handle);
        }
        self.transition(&slot, &mut record, SessionState::Error);
    }

    fn begin_run(slot: &SessionSlot, record: &mut SessionRecord) {
        let now = Utc::now();
        slot.counters.reset();
        record.run = Some(RunInfo {
            started_at: now,
            stop_from: None,
        });
        record.session.started_at = Some(now);
        record.session.restart_count = 0;
        record.session.last_error = None;
        record.session.retries_exhausted = false;
    }

    fn count_restart(record: &mut SessionRecord) {
        record.session.restart_count += 1;
        metrics::sessions::RESTARTS_TOTAL.inc();
    }

    /// Spawn a fresh pipeline unit and move to `starting`. Caller holds the
    /// slot lock.
    fn launch(&self, slot: &Arc<SessionSlot>, record: &mut SessionRecord) {
        record.epoch += 1;
        let epoch = record.epoch;
        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();

        let spec = PipelineSpec {
            session_id: slot.id.clone(),
            name: record.session.name.clone(),
            ingest_path: slot.ingest_path.clone(),
            egress_path: slot.egress_path.clone(),
            profile: record.session.profile,
            options: record.session.options,
            counters: Arc::clone(&slot.counters),
            cancel: cancel.clone(),
            epoch,
        };
        let reporter = PipelineReporter::new(self.self_ref.clone(), slot.id.clone(), epoch);
        let pipeline = self.launcher.launch(spec, reporter);

        let retired = record.retired.take();
        let shutdown_timeout = self.settings.shutdown_timeout;
        let done = finished.clone();
        let span = tracing::info_span!("pipeline", session_id = %slot.id, epoch);
        let task = tokio::spawn(
            async move {
                let _finished = done.drop_guard();
                if let Some(previous) = retired {
                    previous.drain(shutdown_timeout).await;
                }
                pipeline.await;
            }
            .instrument(span),
        );

        record.pipeline = Some(PipelineHandle {
            cancel,
            finished,
            abort: Arc::new(task.abort_handle()),
        });
        self.transition(slot, record, SessionState::Starting);
    }

    fn transition(&self, slot: &SessionSlot, record: &mut SessionRecord, to: SessionState) {
        let from = record.session.state;
        if from == to {
            return;
        }
        record.session.state = to;
        record.session.updated_at = Utc::now();

        metrics::sessions::BY_STATE
            .with_label_values(&[from.as_str()])
            .dec();
        if to != SessionState::Removed {
            metrics::sessions::BY_STATE
                .with_label_values(&[to.as_str()])
                .inc();
        }

        let reason = (to == SessionState::Error)
            .then(|| record.session.last_error.as_ref().map(|f| f.kind))
            .flatten();
        info!(session_id = %slot.id, %from, %to, epoch = record.epoch, "Session state changed");
        let _ = self.events.send(SessionEvent::StateChanged {
            session_id: slot.id.clone(),
            from,
            to,
            reason,
            epoch: record.epoch,
        });
    }

    /// Append the history record for the run in progress, if any. Called
    /// after the terminal state has been written.
    fn finish_run(&self, slot: &SessionSlot, record: &mut SessionRecord, status: HistoryStatus) {
        let Some(run) = record.run.take() else { return };
        let ended_at = Utc::now();
        let duration_secs = u64::try_from((ended_at - run.started_at).num_seconds()).unwrap_or(0);
        let metrics = slot.counters.snapshot(duration_secs);
        let avg_bitrate_kbps = if duration_secs > 0 {
            metrics.bytes_in * 8 / 1000 / duration_secs
        } else {
            metrics.ingest_kbps
        };
        let error_message = match status {
            HistoryStatus::Completed => None,
            HistoryStatus::Error | HistoryStatus::Terminated => {
                record.session.last_error.as_ref().map(|f| f.message.clone())
            }
        };

        let stored = self.history.append(HistoryRecord {
            id: uuid::Uuid::new_v4(),
            session_id: slot.id.clone(),
            name: record.session.name.clone(),
            ingest_url: record.session.ingest_url.clone(),
            egress_url: record.session.egress_url.clone(),
            started_at: run.started_at,
            ended_at,
            duration_secs,
            status,
            peak_viewers: metrics.peak_viewers,
            avg_bitrate_kbps,
            bytes_transferred: metrics.bytes_in + metrics.bytes_out,
            restart_count: record.session.restart_count,
            error_message,
        });
        info!(
            session_id = %slot.id,
            record_id = %stored.id,
            status = stored.status.as_str(),
            duration_secs,
            "Run recorded in history"
        );
    }

    fn snapshot(slot: &SessionSlot, record: &SessionRecord) -> Session {
        let mut session = record.session.clone();
        let uptime_secs = match (&record.run, session.state) {
            (Some(run), SessionState::Starting | SessionState::Active | SessionState::Error) => {
                u64::try_from((Utc::now() - run.started_at).num_seconds()).unwrap_or(0)
            }
            _ => 0,
        };
        session.metrics = slot.counters.snapshot(uptime_secs);
        session
    }
}
