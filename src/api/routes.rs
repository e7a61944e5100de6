//! REST API handlers
//!
//! Command endpoints wrap [`SchedulingService`](crate::scheduler::SchedulingService)
//! and the query endpoint wraps [`EventQueries`](super::EventQueries).

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, PunchupErrorTrait};
use crate::metrics;
use crate::models::{Execution, Job, Schedule};
use crate::processing::{Act, Event, Venue};
use crate::scheduler::{
    CreateJobCommand, CreateScheduleCommand, CreateSitemapCommand, CreateSkuCommand,
    CreateSourceCommand, SchedulerError, SetCollectionConfigCommand, TickReport,
};

use super::server::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Id of a created resource
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: Uuid,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// An event with its venue and lineup
#[derive(Debug, Serialize, Deserialize)]
pub struct EventDetail {
    pub event: Event,
    pub venue: Option<Venue>,
    pub acts: Vec<Act>,
}

#[derive(Debug, Deserialize)]
pub struct TickParams {
    /// Evaluate schedules as of this instant instead of now
    pub at: Option<DateTime<Utc>>,
}

/// Domain error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Scheduler(SchedulerError::JobAlreadyActive { .. }) => StatusCode::CONFLICT,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, category = self.0.category().as_str(), "Request failed");
        }
        (status, Json(ApiResponse::failure(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn created(id: Uuid) -> (StatusCode, Json<ApiResponse<CreatedResponse>>) {
    (
        StatusCode::CREATED,
        Json(ApiResponse::success(CreatedResponse { id })),
    )
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Operational endpoints
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        // Query endpoints
        .route("/events/{slug}", get(get_event))
        // Command endpoints
        .route("/sources", post(create_source))
        .route("/skus", post(create_sku))
        .route("/schedules", post(create_schedule))
        .route("/schedules/{id}", get(get_schedule))
        .route("/sitemaps", post(create_sitemap))
        .route("/collection-configs", post(set_collection_config))
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/run", post(run_job))
        .route("/jobs/{id}/executions", get(list_executions))
        .route("/ticks", post(tick))
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;
    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Operational Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

async fn metrics_endpoint() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::failure(e.to_string())),
        )
            .into_response(),
    }
}

// ============================================================================
// Query Handlers
// ============================================================================

async fn get_event(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<ApiResponse<EventDetail>>> {
    let event = state
        .queries
        .get_event_by_slug(&slug)
        .await?
        .ok_or_else(|| Error::not_found("event", &slug))?;

    let venue = state.queries.venue(event.venue_id).await?;
    let acts = state.queries.acts_for_event(event.id).await?;

    Ok(Json(ApiResponse::success(EventDetail { event, venue, acts })))
}

// ============================================================================
// Command Handlers
// ============================================================================

async fn create_source(
    State(state): State<AppState>,
    Json(command): Json<CreateSourceCommand>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.scheduling.create_source(command)?))
}

async fn create_sku(
    State(state): State<AppState>,
    Json(command): Json<CreateSkuCommand>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.scheduling.create_sku(command)?))
}

async fn create_schedule(
    State(state): State<AppState>,
    Json(command): Json<CreateScheduleCommand>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.scheduling.create_schedule(command)?))
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Schedule>>> {
    let schedule = state
        .scheduling
        .get_schedule(id)?
        .ok_or_else(|| Error::not_found("schedule", id))?;
    Ok(Json(ApiResponse::success(schedule)))
}

async fn create_sitemap(
    State(state): State<AppState>,
    Json(command): Json<CreateSitemapCommand>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.scheduling.create_sitemap(command)?))
}

async fn set_collection_config(
    State(state): State<AppState>,
    Json(command): Json<SetCollectionConfigCommand>,
) -> ApiResult<Json<ApiResponse<CreatedResponse>>> {
    let id = state.scheduling.set_collection_config(command)?;
    Ok(Json(ApiResponse::success(CreatedResponse { id })))
}

async fn create_job(
    State(state): State<AppState>,
    Json(command): Json<CreateJobCommand>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.scheduling.create_job(command)?))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Job>>> {
    let job = state
        .scheduling
        .get_job(id)?
        .ok_or_else(|| Error::not_found("job", id))?;
    Ok(Json(ApiResponse::success(job)))
}

async fn run_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Job>>> {
    let job = state.scheduling.run_job(id).await?;
    Ok(Json(ApiResponse::success(job)))
}

async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<Execution>>>> {
    let executions = state.scheduling.list_executions(id)?;
    Ok(Json(ApiResponse::success(executions)))
}

async fn tick(
    State(state): State<AppState>,
    Query(params): Query<TickParams>,
) -> ApiResult<Json<ApiResponse<TickReport>>> {
    let now = params.at.unwrap_or_else(Utc::now);
    let report = state.scheduling.tick(now, &CancellationToken::new()).await?;
    Ok(Json(ApiResponse::success(report)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert!(response.data.is_some());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_error_status_mapping() {
        let status = |e: Error| ApiError::from(e).status();
        assert_eq!(status(Error::validation("name", "empty")), StatusCode::BAD_REQUEST);
        assert_eq!(status(Error::conflict("source", "Punchup")), StatusCode::CONFLICT);
        assert_eq!(status(Error::not_found("job", Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(Error::Scheduler(SchedulerError::JobAlreadyActive { job_id: Uuid::nil() })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(Error::Scheduler(SchedulerError::DispatcherClosed)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
