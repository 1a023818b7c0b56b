use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::profile::EncodingProfile;
use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a session.
///
/// ```text
/// pending -> starting -> active <-> error
/// active | error -> stopping -> inactive
/// any -> removed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Starting,
    Active,
    Error,
    Stopping,
    Inactive,
    Removed,
}

impl SessionState {
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Starting,
        Self::Active,
        Self::Error,
        Self::Stopping,
        Self::Inactive,
        Self::Removed,
    ];

    /// States in which a live pipeline unit must exist.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Active)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Inactive | Self::Removed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Error => "error",
            Self::Stopping => "stopping",
            Self::Inactive => "inactive",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub enable_audio: bool,
    pub auto_restart: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            enable_audio: true,
            auto_restart: true,
        }
    }
}

/// Last failure recorded on a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl SessionFailure {
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            at: Utc::now(),
        }
    }
}

/// Point-in-time view of a session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub ingest_kbps: u64,
    pub output_fps: f64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub dropped_frames: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub viewers: usize,
    pub peak_viewers: usize,
    pub uptime_secs: u64,
}

/// Live counters shared between a session's pipeline, its egress fan-out
/// and the registry. Updated lock-free.
#[derive(Debug, Default)]
pub struct SessionCounters {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    dropped_frames: AtomicU64,
    viewers: AtomicUsize,
    peak_viewers: AtomicUsize,
    ingest_kbps: AtomicU64,
    output_fps_milli: AtomicU64,
}

impl SessionCounters {
    pub fn record_ingest(&self, bytes: usize) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_output(&self, bytes: usize) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_frame_out(&self) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_viewer(&self) {
        let now = self.viewers.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_viewers.fetch_max(now, Ordering::SeqCst);
    }

    pub fn remove_viewer(&self) {
        let result = self
            .viewers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
        if result.is_err() {
            tracing::warn!("Attempted to decrement viewer count below zero");
        }
    }

    pub fn set_rates(&self, ingest_kbps: u64, output_fps: f64) {
        self.ingest_kbps.store(ingest_kbps, Ordering::Relaxed);
        self.output_fps_milli
            .store((output_fps.max(0.0) * 1000.0) as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn frames_in(&self) -> u64 {
        self.frames_in.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn frames_out(&self) -> u64 {
        self.frames_out.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn viewers(&self) -> usize {
        self.viewers.load(Ordering::SeqCst)
    }

    /// Zero everything except the live viewer count, at the start of a run.
    pub fn reset(&self) {
        self.bytes_in.store(0, Ordering::Relaxed);
        self.bytes_out.store(0, Ordering::Relaxed);
        self.frames_in.store(0, Ordering::Relaxed);
        self.frames_out.store(0, Ordering::Relaxed);
        self.dropped_frames.store(0, Ordering::Relaxed);
        self.ingest_kbps.store(0, Ordering::Relaxed);
        self.output_fps_milli.store(0, Ordering::Relaxed);
        self.peak_viewers
            .store(self.viewers.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self, uptime_secs: u64) -> SessionMetrics {
        SessionMetrics {
            ingest_kbps: self.ingest_kbps.load(Ordering::Relaxed),
            output_fps: self.output_fps_milli.load(Ordering::Relaxed) as f64 / 1000.0,
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            viewers: self.viewers.load(Ordering::SeqCst),
            peak_viewers: self.peak_viewers.load(Ordering::SeqCst),
            uptime_secs,
        }
    }
}

/// Snapshot of a managed conversion job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub description: Option<String>,
    pub ingest_url: String,
    pub egress_url: String,
    pub profile: EncodingProfile,
    pub options: SessionOptions,
    pub state: SessionState,
    pub last_error: Option<SessionFailure>,
    pub retries_exhausted: bool,
    pub restart_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub metrics: SessionMetrics,
}

/// Body of a create request.
///
/// Either `profile` or `preset` must be given; an explicit profile wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateSessionRequest {
    pub name: String,
    pub description: Option<String>,
    pub ingest_url: String,
    pub egress_url: Option<String>,
    pub profile: Option<EncodingProfile>,
    pub preset: Option<String>,
    pub options: SessionOptions,
}

/// Publish path (`app/stream_key`) of an `rtmp://` URL.
pub fn ingest_path(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| Error::ConfigurationInvalid(format!("ingest URL {url:?}: {e}")))?;
    if parsed.scheme() != "rtmp" {
        return Err(Error::ConfigurationInvalid(format!(
            "ingest URL {url:?} must use the rtmp scheme"
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::ConfigurationInvalid(format!(
            "ingest URL {url:?} has no host"
        )));
    }
    let segments: Vec<&str> = parsed
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    if segments.len() < 2 {
        return Err(Error::ConfigurationInvalid(format!(
            "ingest URL {url:?} must name an application and a stream key"
        )));
    }
    Ok(segments.join("/"))
}

/// Mount path of an `rtsp://` URL.
pub fn egress_path(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| Error::ConfigurationInvalid(format!("egress URL {url:?}: {e}")))?;
    if parsed.scheme() != "rtsp" {
        return Err(Error::ConfigurationInvalid(format!(
            "egress URL {url:?} must use the rtsp scheme"
        )));
    }
    let path = parsed.path().trim_matches('/');
    if path.is_empty() {
        return Err(Error::ConfigurationInvalid(format!(
            "egress URL {url:?} has no path"
        )));
    }
    Ok(path.to_string())
}

/// Lowercased name with everything outside `[a-z0-9]` removed.
#[must_use]
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_path() {
        assert_eq!(
            ingest_path("rtmp://localhost:1935/live/stream1").unwrap(),
            "live/stream1"
        );
        assert_eq!(ingest_path("rtmp://host/live/a/b/").unwrap(), "live/a/b");
        assert!(ingest_path("rtmp://localhost/live").is_err());
        assert!(ingest_path("http://localhost/live/key").is_err());
        assert!(ingest_path("not a url").is_err());
    }

    #[test]
    fn test_egress_path() {
        assert_eq!(egress_path("rtsp://localhost:554/cam1").unwrap(), "cam1");
        assert!(egress_path("rtsp://localhost:554/").is_err());
        assert!(egress_path("rtmp://localhost/cam1").is_err());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Main Camera #2"), "maincamera2");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn test_counters_track_peak_viewers() {
        let counters = SessionCounters::default();
        counters.add_viewer();
        counters.add_viewer();
        counters.remove_viewer();
        counters.add_viewer();
        counters.remove_viewer();
        counters.remove_viewer();
        counters.remove_viewer();

        let snapshot = counters.snapshot(0);
        assert_eq!(snapshot.viewers, 0);
        assert_eq!(snapshot.peak_viewers, 2);
    }

    #[test]
    fn test_counters_reset_keeps_live_viewers() {
        let counters = SessionCounters::default();
        counters.record_ingest(1000);
        counters.add_viewer();
        counters.set_rates(800, 29.97);
        counters.reset();

        let snapshot = counters.snapshot(0);
        assert_eq!(snapshot.bytes_in, 0);
        assert_eq!(snapshot.frames_in, 0);
        assert_eq!(snapshot.viewers, 1);
        assert_eq!(snapshot.peak_viewers, 1);
        assert_eq!(snapshot.ingest_kbps, 0);
    }
}
