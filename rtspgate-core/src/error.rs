use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Endpoint unreachable: {0}")]
    EndpointUnreachable(String),

    #[error("Pipeline stalled: {0}")]
    PipelineStalled(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable classification of an [`Error`], kept on a session as its
/// last failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    ConfigurationInvalid,
    NotFound,
    AlreadyExists,
    InvalidState,
    EndpointUnreachable,
    PipelineStalled,
    ResourceExhausted,
    Internal,
}

impl ErrorKind {
    /// Failures the supervisor may recover from by restarting the pipeline.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::EndpointUnreachable | Self::PipelineStalled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigurationInvalid => "configuration-invalid",
            Self::NotFound => "not-found",
            Self::AlreadyExists => "already-exists",
            Self::InvalidState => "invalid-state",
            Self::EndpointUnreachable => "endpoint-unreachable",
            Self::PipelineStalled => "pipeline-stalled",
            Self::ResourceExhausted => "resource-exhausted",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigurationInvalid(_) | Self::Config(_) => ErrorKind::ConfigurationInvalid,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::EndpointUnreachable(_) => ErrorKind::EndpointUnreachable,
            Self::PipelineStalled(_) => ErrorKind::PipelineStalled,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_failures_are_retryable() {
        assert!(Error::PipelineStalled("no frames".into()).is_retryable());
        assert!(Error::EndpointUnreachable("publisher gone".into()).is_retryable());
        assert!(!Error::ConfigurationInvalid("bad fps".into()).is_retryable());
        assert!(!Error::ResourceExhausted("cap".into()).is_retryable());
        assert!(!Error::Internal("boom".into()).is_retryable());
    }

    #[test]
    fn test_error_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::PipelineStalled).unwrap();
        assert_eq!(json, "\"pipeline-stalled\"");
        assert_eq!(ErrorKind::ResourceExhausted.to_string(), "resource-exhausted");
    }
}
