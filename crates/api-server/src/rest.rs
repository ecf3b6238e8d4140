//! REST handlers for event ingestion, pattern and fix review, and
//! operational endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use healwatch_core::error::{MonitorError, MonitorResult};
use healwatch_core::types::{AutomatedFix, ErrorPattern, FixStatus, MonitoringEvent};
use healwatch_correlation::CorrelationStatistics;
use healwatch_engine::{
    HealthSnapshot, IngestReport, ReviewResult, Services, ServiceHealth, TaskStatus, TriggerOutcome,
};
use healwatch_remediation::{FixReview, ReviewStatistics};
use healwatch_store::FixStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Maximum number of events accepted by one batch request.
pub const MAX_BATCH_SIZE: usize = 1000;

const DEFAULT_WINDOW_HOURS: i64 = 24;
const DEFAULT_REVIEW_DAYS: i64 = 7;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub node_id: String,
    pub start_time: Instant,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// A `MonitorError` rendered as a JSON error body.
pub struct ApiError(pub MonitorError);

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MonitorError::Ingestion(_) | MonitorError::Serialization(_) => StatusCode::BAD_REQUEST,
            MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
            MonitorError::InvalidTransition(_) => StatusCode::CONFLICT,
            MonitorError::Auth(_) | MonitorError::ExternalIntegration(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
            metrics::counter!("api.errors").increment(1);
        }
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal processing error".to_string()
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.category().to_string(),
                message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub hours: Option<i64>,
}

impl WindowQuery {
    fn hours(&self) -> i64 {
        self.hours.unwrap_or(DEFAULT_WINDOW_HOURS).max(1)
    }

    fn since(&self) -> MonitorResult<DateTime<Utc>> {
        window_start(self.hours())
    }
}

/// `now - hours`, rejecting windows chrono cannot represent.
fn window_start(hours: i64) -> MonitorResult<DateTime<Utc>> {
    Duration::try_hours(hours)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .ok_or_else(|| MonitorError::Ingestion(format!("window of {hours} hours is out of range")))
}

// ─── Events ─────────────────────────────────────────────────────────────

/// POST /api/v1/events
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<MonitoringEvent>,
) -> ApiResult<(StatusCode, Json<MonitoringEvent>)> {
    let stored = state.services.ingestion.ingest(event)?;
    Ok((StatusCode::ACCEPTED, Json(stored)))
}

/// POST /api/v1/events/batch
pub async fn ingest_batch(
    State(state): State<AppState>,
    Json(events): Json<Vec<MonitoringEvent>>,
) -> ApiResult<Json<IngestReport>> {
    if events.len() > MAX_BATCH_SIZE {
        warn!(size = events.len(), "Batch too large");
        metrics::counter!("api.validation_errors").increment(1);
        return Err(MonitorError::Ingestion(format!("batch exceeds {MAX_BATCH_SIZE} events")).into());
    }
    Ok(Json(state.services.ingestion.ingest_batch(events)))
}

/// GET /api/v1/events/:id
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MonitoringEvent>> {
    Ok(Json(state.services.ingestion.get(&id)?))
}

// ─── Patterns ───────────────────────────────────────────────────────────

/// GET /api/v1/patterns, most frequent first.
pub async fn list_patterns(State(state): State<AppState>) -> ApiResult<Json<Vec<ErrorPattern>>> {
    let mut patterns = state.services.analyzer.list()?;
    patterns.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count));
    Ok(Json(patterns))
}

/// GET /api/v1/patterns/attention
pub async fn patterns_requiring_attention(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ErrorPattern>>> {
    Ok(Json(state.services.analyzer.patterns_requiring_attention()?))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub valid: bool,
}

/// POST /api/v1/patterns/:id/validate
pub async fn validate_pattern(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ValidateRequest>,
) -> ApiResult<Json<ErrorPattern>> {
    Ok(Json(state.services.analyzer.validate_pattern(&id, request.valid)?))
}

/// POST /api/v1/patterns/:id/reset
pub async fn reset_pattern(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ErrorPattern>> {
    Ok(Json(state.services.analyzer.reset_remediation(&id)?))
}

// ─── Fixes ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FixQuery {
    pub status: Option<FixStatus>,
    pub pattern_id: Option<String>,
}

/// GET /api/v1/fixes, newest first.
pub async fn list_fixes(
    State(state): State<AppState>,
    Query(query): Query<FixQuery>,
) -> ApiResult<Json<Vec<AutomatedFix>>> {
    let fixes = &state.services.fixes;
    let mut list = match (&query.pattern_id, query.status) {
        (Some(pattern_id), _) => fixes.by_pattern(pattern_id)?,
        (None, Some(status)) => fixes.by_status(status)?,
        (None, None) => fixes.list()?,
    };
    if let Some(status) = query.status {
        list.retain(|f| f.status == status);
    }
    list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(list))
}

// ─── Correlations ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CorrelationStatsResponse {
    pub window_hours: i64,
    pub enabled: bool,
    #[serde(flatten)]
    pub statistics: CorrelationStatistics,
}

/// GET /api/v1/correlations/stats
pub async fn correlation_stats(
    State(state): State<AppState>,
    Query(window): Query<WindowQuery>,
) -> ApiResult<Json<CorrelationStatsResponse>> {
    let statistics = state.services.correlation.statistics(window.since()?)?;
    Ok(Json(CorrelationStatsResponse {
        window_hours: window.hours(),
        enabled: state.services.correlation.is_enabled(),
        statistics,
    }))
}

/// GET /api/v1/correlations/:id
pub async fn correlated_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<MonitoringEvent>>> {
    let events = state.services.correlation.correlated_events(&id)?;
    if events.is_empty() {
        return Err(MonitorError::NotFound(format!("correlation {id}")).into());
    }
    Ok(Json(events))
}

// ─── Scheduler ──────────────────────────────────────────────────────────

/// GET /api/v1/scheduler
pub async fn scheduler_status(State(state): State<AppState>) -> Json<Vec<TaskStatus>> {
    Json(state.services.scheduler.status())
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub task: String,
    pub outcome: &'static str,
}

/// POST /api/v1/scheduler/:task/run
pub async fn run_task(
    State(state): State<AppState>,
    Path(task): Path<String>,
) -> ApiResult<Json<TriggerResponse>> {
    let outcome = match state.services.scheduler.trigger_now(&task).await? {
        TriggerOutcome::Completed => "completed",
        TriggerOutcome::Skipped => "skipped",
    };
    info!(task = %task, outcome, "Task run requested over API");
    Ok(Json(TriggerResponse { task, outcome }))
}

// ─── Fix reviews ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReviewWindowQuery {
    pub days: Option<i64>,
}

impl ReviewWindowQuery {
    fn since(&self) -> MonitorResult<DateTime<Utc>> {
        let days = self.days.unwrap_or(DEFAULT_REVIEW_DAYS).max(1);
        window_start(days.saturating_mul(24))
    }
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub reviewer: String,
    #[serde(default)]
    pub comments: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reviewer: String,
    pub reason: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModificationRequest {
    pub reviewer: String,
    pub request: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// GET /api/v1/reviews/pending, most severe first.
pub async fn pending_reviews(State(state): State<AppState>) -> Json<Vec<FixReview>> {
    Json(state.services.reviews.pending())
}

/// GET /api/v1/reviews/history
pub async fn review_history(
    State(state): State<AppState>,
    Query(window): Query<ReviewWindowQuery>,
) -> ApiResult<Json<Vec<FixReview>>> {
    Ok(Json(state.services.reviews.history(window.since()?)))
}

/// GET /api/v1/reviews/statistics
pub async fn review_statistics(
    State(state): State<AppState>,
    Query(window): Query<ReviewWindowQuery>,
) -> ApiResult<Json<ReviewStatistics>> {
    Ok(Json(state.services.reviews.statistics(window.since()?)))
}

/// GET /api/v1/reviews/:id
pub async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<FixReview>> {
    Ok(Json(state.services.reviews.get(&id)?))
}

/// POST /api/v1/reviews/:id/approve
pub async fn approve_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ApproveRequest>,
) -> ApiResult<Json<ReviewResult>> {
    let result = state
        .services
        .approve_review(&id, &request.reviewer, &request.comments)
        .await?;
    Ok(Json(result))
}

/// POST /api/v1/reviews/:id/reject
pub async fn reject_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RejectRequest>,
) -> ApiResult<Json<FixReview>> {
    let review = state
        .services
        .reviews
        .reject(&id, &request.reviewer, &request.reason, request.suggestions)?;
    Ok(Json(review))
}

/// POST /api/v1/reviews/:id/request-modifications
pub async fn request_modifications(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ModificationRequest>,
) -> ApiResult<Json<FixReview>> {
    let review = state.services.reviews.request_modifications(
        &id,
        &request.reviewer,
        &request.request,
        request.suggestions,
    )?;
    Ok(Json(review))
}

// ─── Health ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthSummaryResponse {
    pub window_hours: i64,
    pub monitoring: HealthSnapshot,
    pub services: Vec<ServiceHealth>,
    pub remediation_queue: usize,
    pub remediations_active: usize,
}

/// GET /api/v1/health/summary
pub async fn health_summary(
    State(state): State<AppState>,
    Query(window): Query<WindowQuery>,
) -> ApiResult<Json<HealthSummaryResponse>> {
    let services = state.services.ingestion.health_summary(window.since()?)?;
    Ok(Json(HealthSummaryResponse {
        window_hours: window.hours(),
        monitoring: state.services.health.snapshot(),
        services,
        remediation_queue: state.services.dispatcher.queue_depth(),
        remediations_active: state.services.dispatcher.active(),
    }))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub events: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.services.health.is_healthy() { "healthy" } else { "degraded" };
    Json(HealthResponse {
        status: status.to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        events: state.services.ingestion.event_count(),
    })
}

/// GET /ready. Ready while the scheduler runs and the last health check
/// passed.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.services.scheduler.is_running() && state.services.health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
