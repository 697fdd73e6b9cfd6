//! HTTP request handlers.

use super::error::ApiError;
use super::render::{render_csv, render_dashboard};
use super::AppState;
use crate::db::{CheckRecord, NewTarget, Target};
use crate::scheduler::{SweepError, TargetProjection};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Redirect},
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Rows returned by the search endpoint.
const SEARCH_LIMIT: u32 = 200;
/// Check rows included in the CSV export.
const EXPORT_LIMIT: usize = 10_000;
/// Longest history window a client may ask for (one year).
const MAX_HISTORY_MINUTES: i64 = 60 * 24 * 365;

// ============================================================================
// Dashboard
// ============================================================================

pub async fn handle_dashboard(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let projections = state.sweeper.snapshot()?;
    Ok(Html(render_dashboard(&projections)?))
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(
    State(state): State<AppState>,
) -> Result<Json<Vec<TargetProjection>>, ApiError> {
    Ok(Json(state.sweeper.snapshot()?))
}

/// Register a target (or refresh the metadata of an existing address) and
/// check it once right away.
pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<NewTarget>,
) -> Result<Json<TargetProjection>, ApiError> {
    let req = req
        .normalized()
        .ok_or_else(|| ApiError::BadRequest("address is required".to_string()))?;

    let target = state.store.upsert_target(&req)?;
    tracing::info!("Registered target {} ({})", target.id, target.address);

    Ok(Json(state.sweeper.check_target(target.id).await?))
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewTarget>,
) -> Result<Json<Target>, ApiError> {
    let req = req
        .normalized()
        .ok_or_else(|| ApiError::BadRequest("address is required".to_string()))?;

    Ok(Json(state.store.update_target(id, &req)?))
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_target(id)?;
    tracing::info!("Deleted target {} and its history", id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub target: Target,
    pub checks: Vec<CheckRecord>,
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let minutes = query.minutes.unwrap_or(60);
    if minutes <= 0 {
        return Err(ApiError::BadRequest("minutes must be positive".to_string()));
    }

    let target = state.store.get_target(id)?;
    let since = Utc::now() - ChronoDuration::minutes(minutes.min(MAX_HISTORY_MINUTES));
    let checks = state.store.history_since(id, since)?;

    Ok(Json(HistoryResponse { target, checks }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn handle_search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Target>>, ApiError> {
    let q = query.q.trim();
    if q.is_empty() {
        return Ok(Json(Vec::new()));
    }
    Ok(Json(state.store.search_targets(q, SEARCH_LIMIT)?))
}

// ============================================================================
// API: Sweeps
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CheckAllResponse {
    pub targets: Vec<TargetProjection>,
}

/// Run a full sweep now.
pub async fn handle_check_all(State(state): State<AppState>) -> Result<Json<CheckAllResponse>, ApiError> {
    let targets = sweep_detached(&state).await?;
    Ok(Json(CheckAllResponse { targets }))
}

/// Dashboard form variant of `handle_check_all`; sends the browser back to `/`.
pub async fn handle_check_all_form(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    sweep_detached(&state).await?;
    Ok(Redirect::to("/"))
}

/// The sweep runs in its own task so a client disconnecting mid-sweep does
/// not abandon half-written results.
async fn sweep_detached(state: &AppState) -> Result<Vec<TargetProjection>, ApiError> {
    let sweeper = state.sweeper.clone();
    let result: Result<_, SweepError> = tokio::spawn(async move { sweeper.run_sweep().await })
        .await
        .map_err(|e| ApiError::Internal(format!("sweep task failed: {}", e)))?;
    Ok(result?)
}

// ============================================================================
// Export
// ============================================================================

pub async fn handle_export_csv(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let targets = state.store.list_targets()?;
    let checks = state.store.export_checks(EXPORT_LIMIT)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=ipwatch_export.csv"),
        ],
        render_csv(&targets, &checks),
    ))
}
