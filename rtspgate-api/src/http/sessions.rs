//! Session endpoints
//!
//! CRUD plus the start/stop/restart lifecycle commands. Every handler
//! returns the session snapshot after the command.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rtspgate_core::models::{CreateSessionRequest, Session, SessionId};
use tracing::info;

use crate::http::{AppResult, AppState};

pub fn create_sessions_router() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route(
            "/api/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/sessions/{id}/start", post(start_session))
        .route("/api/sessions/{id}/stop", post(stop_session))
        .route("/api/sessions/{id}/restart", post(restart_session))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<Session>> {
    Json(state.registry.list().await)
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> AppResult<(StatusCode, Json<Session>)> {
    let session = state.registry.create(request).await?;
    info!(session_id = %session.id, name = %session.name, "Session created via API");
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Session>> {
    Ok(Json(state.registry.get(&SessionId::from(id.as_str())).await?))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Session>> {
    Ok(Json(state.registry.remove(&SessionId::from(id.as_str())).await?))
}

pub async fn start_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Session>> {
    Ok(Json(state.registry.start(&SessionId::from(id.as_str())).await?))
}

pub async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Session>> {
    Ok(Json(state.registry.stop(&SessionId::from(id.as_str())).await?))
}

pub async fn restart_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Session>> {
    Ok(Json(state.registry.restart(&SessionId::from(id.as_str())).await?))
}
