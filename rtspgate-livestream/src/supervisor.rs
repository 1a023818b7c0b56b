//! The Supervisor: periodic health sampling with admission control, and
//! the restart policy for failed sessions.
//!
//! Two tasks. The poll loop samples host resources and session counters
//! every `poll_interval_ms`; the restart loop follows registry events and
//! schedules backoff restarts for sessions that failed with a retryable
//! reason.

use chrono::Utc;
use parking_lot::RwLock;
use rtspgate_core::config::SupervisorConfig;
use rtspgate_core::health::{HealthStore, ResourceProbe};
use rtspgate_core::metrics;
use rtspgate_core::models::{
    HealthLevel, HealthSample, ServiceState, ServiceStatus, SessionId, SessionState,
};
use rtspgate_core::resilience::RestartPolicy;
use rtspgate_core::{ErrorKind, SessionEvent, SessionRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const SUPERVISOR_SERVICE: &str = "supervisor";

/// Status of each long-running component, as shown by the control API.
#[derive(Default)]
pub struct ServiceBoard {
    services: RwLock<Vec<ServiceStatus>>,
}

impl ServiceBoard {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record `state` for `name`; `since` only moves when the state changes.
    pub fn set(&self, name: &str, state: ServiceState) {
        let mut services = self.services.write();
        match services.iter_mut().find(|s| s.name == name) {
            Some(status) if status.state == state => {}
            Some(status) => {
                info!(service = name, from = ?status.state, to = ?state, "Service state changed");
                status.state = state;
                status.since = Utc::now();
            }
            None => services.push(ServiceStatus {
                name: name.to_string(),
                state,
                since: Utc::now(),
            }),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.services.read().iter().find(|s| s.name == name).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<ServiceStatus> {
        self.services.read().clone()
    }
}

/// A scheduled restart. `fired` is set once the delay elapsed and the
/// supervisor itself is restarting the session.
struct PendingRetry {
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
}

#[derive(Default)]
struct RetryState {
    attempts: u32,
    pending: Option<PendingRetry>,
}

impl RetryState {
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }
    }

    fn take_fired(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => pending.fired.load(Ordering::SeqCst),
            None => false,
        }
    }
}

pub struct Supervisor {
    registry: Arc<SessionRegistry>,
    probe: Arc<dyn ResourceProbe>,
    health: Arc<HealthStore>,
    services: Arc<ServiceBoard>,
    config: SupervisorConfig,
    policy: RestartPolicy,
}

/// Join handles of the two Supervisor tasks.
pub struct SupervisorTasks {
    pub poll: JoinHandle<()>,
    pub restarts: JoinHandle<()>,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        probe: Arc<dyn ResourceProbe>,
        health: Arc<HealthStore>,
        services: Arc<ServiceBoard>,
        config: &SupervisorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            probe,
            health,
            services,
            config: config.clone(),
            policy: RestartPolicy::from_config(config),
        })
    }

    #[must_use]
    pub fn health(&self) -> &Arc<HealthStore> {
        &self.health
    }

    /// Start both loops. The event subscription is taken before returning,
    /// so no failure after this call is missed.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> SupervisorTasks {
        let events = self.registry.subscribe();
        let poll = tokio::spawn(Arc::clone(self).run_poll_loop(shutdown.clone()));
        let restarts = tokio::spawn(Arc::clone(self).run_restart_loop(events, shutdown));
        SupervisorTasks { poll, restarts }
    }

    /// Take one health sample and apply the capacity cap.
    pub async fn poll_once(&self) -> HealthSample {
        let usage = self.probe.sample();
        // absent readings count as idle
        let cpu_percent = usage.cpu_percent.unwrap_or(0.0);
        let memory_percent = usage.memory_percent.unwrap_or(0.0);

        let sessions = self.registry.list().await;
        let active_sessions = sessions
            .iter()
            .filter(|s| s.state == SessionState::Active)
            .count();
        let error_sessions = sessions
            .iter()
            .filter(|s| s.state == SessionState::Error)
            .count();
        let running_sessions = sessions.iter().filter(|s| s.state.is_running()).count();
        let total_viewers = sessions.iter().map(|s| s.metrics.viewers).sum();
        // passthrough egress runs at the ingest rate once per viewer
        let network_kbps = sessions
            .iter()
            .filter(|s| s.state.is_running())
            .map(|s| s.metrics.ingest_kbps * (1 + s.metrics.viewers as u64))
            .sum();

        let level = HealthLevel::from_percent(
            cpu_percent,
            self.config.warning_percent,
            self.config.critical_percent,
        )
        .max(HealthLevel::from_percent(
            memory_percent,
            self.config.warning_percent,
            self.config.critical_percent,
        ));

        let sample = HealthSample {
            at: Utc::now(),
            cpu_percent,
            memory_percent,
            network_kbps,
            active_sessions,
            error_sessions,
            total_viewers,
            level,
        };
        self.health.push(sample.clone());
        metrics::system::CPU_PERCENT.set(cpu_percent);
        metrics::system::MEMORY_PERCENT.set(memory_percent);

        match self.capacity_problem(cpu_percent, memory_percent, running_sessions) {
            Some(reason) => self.registry.admission().close(reason),
            None => self.registry.admission().open(),
        }
        self.services.set(
            SUPERVISOR_SERVICE,
            if level == HealthLevel::Ok {
                ServiceState::Running
            } else {
                ServiceState::Warning
            },
        );

        debug!(
            cpu_percent,
            memory_percent,
            active_sessions,
            error_sessions,
            total_viewers,
            network_kbps,
            ?level,
            "Health sample"
        );
        sample
    }

    fn capacity_problem(&self, cpu: f64, memory: f64, running: usize) -> Option<String> {
        if cpu >= self.config.max_cpu_percent {
            Some(format!(
                "cpu at {cpu:.1}% (limit {:.1}%)",
                self.config.max_cpu_percent
            ))
        } else if memory >= self.config.max_memory_percent {
            Some(format!(
                "memory at {memory:.1}% (limit {:.1}%)",
                self.config.max_memory_percent
            ))
        } else if running >= self.config.max_sessions {
            Some(format!(
                "{running} running sessions (limit {})",
                self.config.max_sessions
            ))
        } else {
            None
        }
    }

    async fn run_poll_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.config.poll_interval_ms,
            "Supervisor poll loop started"
        );
        self.services.set(SUPERVISOR_SERVICE, ServiceState::Running);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.poll_once().await;
                }
            }
        }
        self.services.set(SUPERVISOR_SERVICE, ServiceState::Stopped);
        info!("Supervisor poll loop stopped");
    }

    async fn run_restart_loop(
        self: Arc<Self>,
        events: broadcast::Receiver<SessionEvent>,
        shutdown: CancellationToken,
    ) {
        let mut events = BroadcastStream::new(events);
        let mut retries: HashMap<SessionId, RetryState> = HashMap::new();

        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.next() => event,
            };
            match event {
                None => break,
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "Supervisor fell behind session events");
                }
                Some(Ok(SessionEvent::StateChanged {
                    session_id,
                    to,
                    reason,
                    epoch,
                    ..
                })) => {
                    self.on_state_changed(&mut retries, session_id, to, reason, epoch, &shutdown)
                        .await;
                }
            }
        }

        for state in retries.values_mut() {
            state.cancel_pending();
        }
        info!("Supervisor restart loop stopped");
    }

    async fn on_state_changed(
        &self,
        retries: &mut HashMap<SessionId, RetryState>,
        session_id: SessionId,
        to: SessionState,
        reason: Option<ErrorKind>,
        epoch: u64,
        shutdown: &CancellationToken,
    ) {
        match to {
            SessionState::Error => {
                let Some(kind) = reason else { return };
                if !kind.is_retryable() {
                    debug!(session_id = %session_id, %kind, "Failure is not retryable");
                    return;
                }
                let auto_restart = match self.registry.get(&session_id).await {
                    Ok(session) => session.options.auto_restart,
                    Err(_) => return,
                };
                if !auto_restart {
                    return;
                }

                let state = retries.entry(session_id.clone()).or_default();
                state.cancel_pending();
                match self.policy.delay_for(state.attempts) {
                    Some(delay) => {
                        state.attempts += 1;
                        let cancel = shutdown.child_token();
                        let fired = Arc::new(AtomicBool::new(false));
                        state.pending = Some(PendingRetry {
                            cancel: cancel.clone(),
                            fired: Arc::clone(&fired),
                        });
                        info!(
                            session_id = %session_id,
                            attempt = state.attempts,
                            delay_ms = delay.as_millis() as u64,
                            %kind,
                            "Scheduling restart"
                        );
                        tokio::spawn(retry_after(
                            Arc::clone(&self.registry),
                            session_id,
                            epoch,
                            delay,
                            cancel,
                            fired,
                        ));
                    }
                    None => {
                        if let Err(e) = self
                            .registry
                            .mark_retries_exhausted(&session_id, epoch)
                            .await
                        {
                            debug!(session_id = %session_id, error = %e, "Could not flag exhausted retries");
                        }
                    }
                }
            }
            SessionState::Active => {
                if let Some(mut state) = retries.remove(&session_id) {
                    state.cancel_pending();
                    debug!(session_id = %session_id, "Session recovered, retry budget reset");
                }
            }
            SessionState::Starting => {
                let Some(state) = retries.get_mut(&session_id) else { return };
                if state.take_fired() {
                    return;
                }
                // operator start or restart: fresh retry budget
                if let Some(mut state) = retries.remove(&session_id) {
                    state.cancel_pending();
                    debug!(session_id = %session_id, "Manual start, retry budget reset");
                }
            }
            SessionState::Pending
            | SessionState::Stopping
            | SessionState::Inactive
            | SessionState::Removed => {
                if let Some(mut state) = retries.remove(&session_id) {
                    state.cancel_pending();
                }
            }
        }
    }
}

async fn retry_after(
    registry: Arc<SessionRegistry>,
    session_id: SessionId,
    epoch: u64,
    delay: Duration,
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
) {
    tokio::select! {
        () = cancel.cancelled() => {
            debug!(session_id = %session_id, "Scheduled restart cancelled");
            return;
        }
        () = tokio::time::sleep(delay) => {}
    }
    fired.store(true, Ordering::SeqCst);
    match registry.retry_failed(&session_id, epoch).await {
        Ok(Some(session)) => info!(
            session_id = %session_id,
            restart_count = session.restart_count,
            "Session restarted by supervisor"
        ),
        Ok(None) => debug!(session_id = %session_id, "Session left error before its restart"),
        Err(e) => debug!(session_id = %session_id, error = %e, "Scheduled restart skipped"),
    }
}
