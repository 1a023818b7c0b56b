use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Ok,
    Warning,
    Critical,
}

impl HealthLevel {
    #[must_use]
    pub fn from_percent(value: f64, warning: f64, critical: f64) -> Self {
        if value >= critical {
            Self::Critical
        } else if value >= warning {
            Self::Warning
        } else {
            Self::Ok
        }
    }
}

/// One Supervisor poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Aggregate ingest plus egress bitrate across running sessions.
    pub network_kbps: u64,
    pub active_sessions: usize,
    pub error_sessions: usize,
    pub total_viewers: usize,
    pub level: HealthLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Running,
    Warning,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub since: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_thresholds() {
        assert_eq!(HealthLevel::from_percent(10.0, 70.0, 90.0), HealthLevel::Ok);
        assert_eq!(HealthLevel::from_percent(70.0, 70.0, 90.0), HealthLevel::Warning);
        assert_eq!(HealthLevel::from_percent(95.5, 70.0, 90.0), HealthLevel::Critical);
        assert!(HealthLevel::Critical > HealthLevel::Warning);
    }
}
