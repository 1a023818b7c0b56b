//! System endpoints: health probe, Supervisor samples, presets and the
//! Prometheus scrape.

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use rtspgate_core::metrics::gather_metrics;
use rtspgate_core::models::{HealthLevel, HealthSample, Preset, ServiceStatus};
use serde::Serialize;

use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Serialize)]
pub struct AdmissionStatus {
    pub open: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    /// `ok` until the first sample arrives.
    pub level: HealthLevel,
    pub latest: Option<HealthSample>,
    pub services: Vec<ServiceStatus>,
    pub admission: AdmissionStatus,
    pub sessions: usize,
}

pub fn create_system_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/api/presets", get(list_presets))
        .route("/api/system", get(system_status))
        .route("/api/system/samples", get(system_samples))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

pub async fn list_presets(State(state): State<AppState>) -> Json<Vec<Preset>> {
    Json(state.registry.presets().to_vec())
}

pub async fn system_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let latest = state.health.latest();
    let admission = state.registry.admission();
    Json(SystemStatus {
        level: latest.as_ref().map_or(HealthLevel::Ok, |s| s.level),
        latest,
        services: state.services.list(),
        admission: AdmissionStatus {
            open: admission.is_open(),
            reason: admission.reason(),
        },
        sessions: state.registry.len(),
    })
}

pub async fn system_samples(State(state): State<AppState>) -> Json<Vec<HealthSample>> {
    Json(state.health.samples())
}

pub async fn metrics() -> AppResult<impl IntoResponse> {
    let body = gather_metrics().map_err(|e| {
        tracing::error!(error = %e, "Failed to gather metrics");
        AppError::internal_server_error("Failed to gather metrics")
    })?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
