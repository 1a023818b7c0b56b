use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    /// Stopped cleanly while active.
    Completed,
    /// Stopped while in the error state.
    Error,
    /// Removed, or stopped before the pipeline ever became active.
    Terminated,
}

impl HistoryStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Terminated => "terminated",
        }
    }
}

/// Summary of one finished run of a session. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: uuid::Uuid,
    pub session_id: SessionId,
    pub name: String,
    pub ingest_url: String,
    pub egress_url: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub status: HistoryStatus,
    pub peak_viewers: usize,
    pub avg_bitrate_kbps: u64,
    pub bytes_transferred: u64,
    pub restart_count: u32,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryFilter {
    pub status: Option<HistoryStatus>,
    /// Case-insensitive substring of the session name.
    pub search: Option<String>,
}

impl HistoryFilter {
    #[must_use]
    pub fn matches(&self, record: &HistoryRecord) -> bool {
        if self.status.is_some_and(|s| s != record.status) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => record
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub terminated: usize,
    pub total_viewers: usize,
    pub total_bytes: u64,
}
