//! Run history endpoints

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use rtspgate_core::models::{HistoryFilter, HistoryRecord, HistorySummary};

use crate::http::AppState;

pub fn create_history_router() -> Router<AppState> {
    Router::new()
        .route("/api/history", get(list_history))
        .route("/api/history/summary", get(history_summary))
}

/// Newest first; `status` and case-insensitive `search` narrow the list.
pub async fn list_history(
    State(state): State<AppState>,
    Query(filter): Query<HistoryFilter>,
) -> Json<Vec<HistoryRecord>> {
    let records = state.registry.history().list(&filter);
    Json(records.iter().map(|r| (**r).clone()).collect())
}

pub async fn history_summary(State(state): State<AppState>) -> Json<HistorySummary> {
    Json(state.registry.history().summary())
}
