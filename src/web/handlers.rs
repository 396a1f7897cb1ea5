//! HTTP request handlers.

use super::AppState;
use crate::balance::{SourceConfig, SourceKind};
use crate::db::{NumberTarget, ReportPeriod};
use crate::scheduler::{QueryError, SchedulePlan, SchedulerError};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("{0}")]
    NotFound(String),
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        ApiError::Scheduler(SchedulerError::Query(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Scheduler(SchedulerError::Query(_)) => StatusCode::BAD_REQUEST,
            ApiError::Scheduler(SchedulerError::InvalidInterval(_)) => StatusCode::BAD_REQUEST,
            ApiError::Scheduler(SchedulerError::NotRunning) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Source configs may be given directly or as a list to pick the active ones from.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSelection {
    #[serde(default)]
    pub adsl: Option<SourceConfig>,
    #[serde(default)]
    pub forge: Option<SourceConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl SourceSelection {
    fn resolve(self) -> (Option<SourceConfig>, Option<SourceConfig>) {
        let adsl = self
            .adsl
            .or_else(|| SourceConfig::select(&self.sources, SourceKind::Adsl).cloned());
        let forge = self
            .forge
            .or_else(|| SourceConfig::select(&self.sources, SourceKind::Forge).cloned());
        (adsl, forge)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub numbers: Vec<NumberTarget>,
    #[serde(flatten)]
    pub sources: SourceSelection,
    pub query_interval_minutes: u64,
    pub report_interval_hours: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub numbers: Vec<NumberTarget>,
    #[serde(flatten)]
    pub sources: SourceSelection,
    #[serde(default = "default_save")]
    pub save_to_history: bool,
}

fn default_save() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateReportRequest {
    #[serde(default)]
    pub period: ReportPeriod,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunNowRequest {
    #[serde(default = "default_save")]
    pub save_to_history: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNumbersRequest {
    pub numbers: Vec<NumberTarget>,
}

// ============================================================================
// API: Scheduler
// ============================================================================

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.status().await)
}

pub async fn handle_feed(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.feed.snapshot())
}

pub async fn handle_start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (adsl, forge) = req.sources.resolve();
    let plan = SchedulePlan {
        numbers: req.numbers,
        adsl,
        forge,
        query_interval_minutes: req.query_interval_minutes,
        report_interval_hours: req.report_interval_hours,
    };

    state.scheduler.start(plan, state.feed.clone()).await?;
    Ok(Json(state.scheduler.status().await))
}

pub async fn handle_stop(State(state): State<AppState>) -> impl IntoResponse {
    state.scheduler.stop().await;
    Json(state.scheduler.status().await)
}

pub async fn handle_update_numbers(
    State(state): State<AppState>,
    Json(req): Json<UpdateNumbersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.update_numbers(req.numbers).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handle_run_now(
    State(state): State<AppState>,
    Json(req): Json<RunNowRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let results = state.scheduler.run_now(req.save_to_history).await?;
    Ok(Json(results))
}

pub async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (adsl, forge) = req.sources.resolve();
    let results = state
        .scheduler
        .query_once(&req.numbers, adsl.as_ref(), forge.as_ref(), req.save_to_history)
        .await?;
    Ok(Json(results))
}

// ============================================================================
// API: History
// ============================================================================

pub async fn handle_get_history(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.history.all())
}

pub async fn handle_latest_batch(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state
        .history
        .latest()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no queries recorded yet".to_string()))
}

pub async fn handle_clear_history(State(state): State<AppState>) -> impl IntoResponse {
    state.history.clear();
    StatusCode::NO_CONTENT
}

// ============================================================================
// API: Reports
// ============================================================================

pub async fn handle_get_reports(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.reports.all())
}

pub async fn handle_latest_report(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state
        .reports
        .latest()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no reports generated yet".to_string()))
}

pub async fn handle_generate_report(
    State(state): State<AppState>,
    Json(req): Json<GenerateReportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .reporter
        .generate_and_store(req.period)
        .map(|report| (StatusCode::CREATED, Json(report)))
        .ok_or_else(|| ApiError::NotFound("no data available for the requested period".to_string()))
}

pub async fn handle_delete_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.reports.delete(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("report {} not found", id)))
    }
}

pub async fn handle_clear_reports(State(state): State<AppState>) -> impl IntoResponse {
    state.reports.clear();
    StatusCode::NO_CONTENT
}
