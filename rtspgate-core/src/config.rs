use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::Preset;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub egress: EgressConfig,
    pub pipeline: PipelineConfig,
    pub supervisor: SupervisorConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
    /// Extra presets, merged after the built-in ones.
    pub presets: Vec<Preset>,
}

/// Control API listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

/// RTMP ingest listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// Outgoing chunk size announced to publishers.
    pub chunk_size: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1935,
            max_connections: 256,
            chunk_size: 4096,
        }
    }
}

/// RTSP egress listener and fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    pub host: String,
    pub port: u16,
    /// Host used when generating `rtsp://` URLs for new sessions.
    pub public_host: String,
    /// Port used when generating URLs; defaults to `port`.
    pub public_port: Option<u16>,
    pub max_connections: usize,
    pub max_subscribers_per_path: usize,
    /// Per-subscriber queue depth in frames.
    pub subscriber_queue: usize,
    /// Idle RTSP connections are closed after this many seconds.
    pub session_timeout_secs: u64,
    /// Number of GOPs replayed to a subscriber on PLAY; 0 disables the cache.
    pub gop_cache: usize,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8554,
            public_host: "localhost".to_string(),
            public_port: None,
            max_connections: 1024,
            max_subscribers_per_path: 64,
            subscriber_queue: 512,
            session_timeout_secs: 60,
            gop_cache: 1,
        }
    }
}

/// Per-session pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded buffer between ingest and the pipeline, in frames.
    pub buffer_frames: usize,
    /// No frame for this long marks the session as stalled.
    pub stall_timeout_ms: u64,
    /// How long stop waits for a pipeline to exit before aborting it.
    pub shutdown_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_frames: 1024,
            stall_timeout_ms: 10_000,
            shutdown_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub poll_interval_ms: u64,
    pub sample_retention_secs: u64,
    pub max_samples: usize,
    /// Hard cap on registered sessions.
    pub max_sessions: usize,
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub warning_percent: f64,
    pub critical_percent: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            sample_retention_secs: 3_600,
            max_samples: 2_000,
            max_sessions: 32,
            max_cpu_percent: 95.0,
            max_memory_percent: 95.0,
            max_retries: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            warning_percent: 70.0,
            critical_percent: 90.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_records: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_records: 1_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub const fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl SupervisorConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn sample_retention(&self) -> Duration {
        Duration::from_secs(self.sample_retention_secs)
    }
}

impl Config {
    /// Load configuration from multiple sources
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (`RTSPGATE_INGEST__PORT`, ...)
    /// 2. Config file (if provided)
    /// 3. Defaults
    pub fn load(config_file: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Field names contain underscores, so sections are split on "__".
        builder = builder.add_source(
            Environment::with_prefix("RTSPGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check cross-field constraints, reporting every problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.pipeline.buffer_frames == 0 {
            problems.push("pipeline.buffer_frames must be greater than 0".to_string());
        }
        if self.pipeline.stall_timeout_ms == 0 {
            problems.push("pipeline.stall_timeout_ms must be greater than 0".to_string());
        }
        if self.egress.subscriber_queue == 0 {
            problems.push("egress.subscriber_queue must be greater than 0".to_string());
        }
        if self.supervisor.max_sessions == 0 {
            problems.push("supervisor.max_sessions must be greater than 0".to_string());
        }
        if self.supervisor.poll_interval_ms == 0 {
            problems.push("supervisor.poll_interval_ms must be greater than 0".to_string());
        }
        if self.supervisor.initial_backoff_ms > self.supervisor.max_backoff_ms {
            problems.push(
                "supervisor.initial_backoff_ms must not exceed supervisor.max_backoff_ms"
                    .to_string(),
            );
        }
        if self.supervisor.warning_percent >= self.supervisor.critical_percent {
            problems.push(
                "supervisor.warning_percent must be below supervisor.critical_percent".to_string(),
            );
        }
        if self.ingest.chunk_size < 128 {
            problems.push("ingest.chunk_size must be at least 128".to_string());
        }
        if self.egress.public_host.is_empty() {
            problems.push("egress.public_host must not be empty".to_string());
        }
        for preset in &self.presets {
            if let Err(e) = preset.profile.validate() {
                problems.push(format!("preset {}: {e}", preset.name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::ConfigurationInvalid(problems.join("; ")))
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Get RTMP listen address
    #[must_use]
    pub fn ingest_address(&self) -> String {
        format!("{}:{}", self.ingest.host, self.ingest.port)
    }

    /// Get RTSP listen address
    #[must_use]
    pub fn egress_address(&self) -> String {
        format!("{}:{}", self.egress.host, self.egress.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.ingest.port, 1935);
        assert_eq!(config.egress.port, 8554);
        assert_eq!(config.http_address(), "0.0.0.0:8080");
        assert_eq!(config.pipeline.stall_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[ingest]
port = 19350

[supervisor]
max_sessions = 4
max_retries = 2

[[presets]]
name = "mobile"
label = "Mobile"

[presets.profile]
resolution = {{ width = 640, height = 360 }}
bitrate_kbps = 800
fps = 25
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.ingest.port, 19350);
        assert_eq!(config.supervisor.max_sessions, 4);
        assert_eq!(config.supervisor.max_retries, 2);
        // untouched sections keep their defaults
        assert_eq!(config.egress.port, 8554);
        assert_eq!(config.presets.len(), 1);
        assert_eq!(config.presets[0].profile.resolution.width, 640);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some("/nonexistent/rtspgate.toml")).unwrap();
        assert_eq!(config.server.http_port, 8080);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = Config::default();
        config.pipeline.buffer_frames = 0;
        config.supervisor.max_sessions = 0;
        config.supervisor.initial_backoff_ms = 60_000;

        let err = config.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("buffer_frames"));
        assert!(message.contains("max_sessions"));
        assert!(message.contains("initial_backoff_ms"));
        assert_eq!(err.kind(), crate::ErrorKind::ConfigurationInvalid);
    }
}
