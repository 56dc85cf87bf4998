//! REST API handlers for the admin server
//!
//! This module defines the routes for manual triggers, status and metrics.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::{Error, ErrorCategory, RoundkeeperErrorTrait};
use crate::lifecycle::{DrawOutcome, LifecycleError, StatusReport};
use crate::metrics;
use crate::scheduler::TaskStatus;

use super::server::AppState;

/// Header carrying the admin key
pub const API_KEY_HEADER: &str = "x-api-key";

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
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

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<&'static str>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            category: None,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Status response: lifecycle plus background tasks
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub lifecycle: StatusReport,
    pub tasks: Vec<TaskStatus>,
}

/// Crate errors as HTTP responses
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let category = self.0.category();
        let status = match (&self.0, category) {
            (Error::Lifecycle(LifecycleError::SyncUnavailable), _) => StatusCode::NOT_IMPLEMENTED,
            (Error::Lifecycle(_), _) => StatusCode::CONFLICT,
            (_, ErrorCategory::TransientRetryable | ErrorCategory::LockContention) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, category = category.as_str(), "Admin request failed");
        }

        let body = ErrorResponse {
            success: false,
            error: self.0.to_string(),
            category: Some(category.as_str()),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let triggers = Router::new()
        .route("/api/rounds", post(create_round))
        .route("/api/rounds/draw", post(draw_winner))
        .route("/api/entries/sync", post(sync_entries))
        .route("/api/status", get(status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/api/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .merge(triggers)
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

// ============================================================================
// Middleware
// ============================================================================

async fn require_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.api_key.as_deref() {
        let given = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(expected) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Missing or invalid API key")),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn track_requests(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    metrics::record_api_request(
        &path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

async fn metrics_handler() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("Failed to encode metrics: {e}"))),
        )
            .into_response(),
    }
}

/// Forced round creation
async fn create_round(State(state): State<AppState>) -> ApiResult<crate::lifecycle::TickAction> {
    let action = state.coordinator.create_round().await?;
    tracing::info!(action = ?action, "Manual round creation");
    Ok(Json(ApiResponse::success(action)))
}

async fn sync_entries(State(state): State<AppState>) -> ApiResult<crate::feed::SyncReport> {
    let report = state.coordinator.sync_entries().await?;
    Ok(Json(ApiResponse::success(report)))
}

async fn draw_winner(State(state): State<AppState>) -> Result<Response, ApiError> {
    let outcome = state.coordinator.draw_winner().await?;
    let status = match outcome {
        DrawOutcome::LockBusy => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    Ok((status, Json(ApiResponse::success(outcome))).into_response())
}

async fn status(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let lifecycle = state.coordinator.status().await?;
    let tasks = state.tasks.iter().map(|t| t.status()).collect();
    Ok(Json(ApiResponse::success(StatusResponse { lifecycle, tasks })))
}
