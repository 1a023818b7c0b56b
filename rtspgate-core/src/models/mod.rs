pub mod health;
pub mod history;
pub mod profile;
pub mod session;

pub use health::{HealthLevel, HealthSample, ServiceState, ServiceStatus};
pub use history::{HistoryFilter, HistoryRecord, HistoryStatus, HistorySummary};
pub use profile::{builtin_presets, AudioCodec, EncodingProfile, Preset, Resolution, VideoCodec};
pub use session::{
    egress_path, ingest_path, slugify, CreateSessionRequest, Session, SessionCounters,
    SessionFailure, SessionId, SessionMetrics, SessionOptions, SessionState,
};
