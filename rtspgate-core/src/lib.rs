pub mod config;
pub mod error;
pub mod health;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod resilience;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use registry::{
    AdmissionGate, PipelineLauncher, PipelineReporter, PipelineSpec, RegistrySettings,
    SessionEvent, SessionRegistry,
};
