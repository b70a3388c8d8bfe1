//! HTTP surface — REST endpoints over the coordinator core.
//!
//! Thin layer: parses requests, calls the components, serializes results.
//! All state and synchronization live behind the store.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, FleetError, JobError};
use crate::fleet::FleetRegistry;
use crate::jobs::model::JobAction;
use crate::jobs::{JobDispatcher, ResultAggregator, StatusReporter};
use crate::queue::DeviceMailbox;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<FleetRegistry>,
    pub dispatcher: Arc<JobDispatcher>,
    pub aggregator: Arc<ResultAggregator>,
    pub reporter: Arc<StatusReporter>,
    pub mailbox: Arc<DeviceMailbox>,
}

/// Build the Axum router for the coordinator API.
pub fn farm_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/devices/register", post(register_device))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/{id}/queue/lease", post(lease_message))
        .route("/api/devices/{id}/queue/ack", post(ack_message))
        .route("/api/jobs", post(dispatch_job))
        .route("/api/jobs/result", post(report_result))
        .route("/api/jobs/{id}", get(job_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Error mapping ───────────────────────────────────────────────────────

/// Wrapper that maps the error taxonomy onto HTTP statuses.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            Error::Job(JobError::InvalidTarget { .. }) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": "invalid_target", "detail": self.0.to_string() }),
            ),
            Error::Job(JobError::NoWorkersAvailable) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": "no_workers_available", "detail": self.0.to_string() }),
            ),
            Error::Job(JobError::DispatchFailed {
                job_id,
                failed_devices,
            }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({
                    "error": "dispatch_failed",
                    "detail": self.0.to_string(),
                    "job_id": job_id,
                    "failed_devices": failed_devices,
                }),
            ),
            Error::Job(JobError::NotFound { .. })
            | Error::Job(JobError::AssignmentNotFound { .. })
            | Error::Fleet(FleetError::DeviceNotFound { .. }) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": "not_found", "detail": self.0.to_string() }),
            ),
            Error::Job(JobError::DuplicateResult { .. }) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": "duplicate_result", "detail": self.0.to_string() }),
            ),
            _ => {
                tracing::error!(error = %self.0, "Internal error serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "internal", "detail": "internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "device-farm"
    }))
}

// ── Devices ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    device_id: String,
    device_name: String,
    account_handle: String,
}

async fn register_device(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .registry
        .register(&req.device_id, &req.device_name, &req.account_handle)
        .await?;

    Ok(Json(serde_json::json!({
        "status": outcome,
        "device_id": req.device_id,
        "channel": format!("device_{}", req.device_id),
    })))
}

async fn list_devices(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let devices = state.reporter.live_devices().await?;

    Ok(Json(serde_json::json!({
        "total_devices": devices.len(),
        "online_devices": devices,
    })))
}

// ── Queue consumption ───────────────────────────────────────────────────

async fn lease_message(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let leased = state.mailbox.lease_next(&device_id).await?;
    Ok(Json(serde_json::json!({ "message": leased })))
}

#[derive(Debug, Deserialize)]
struct AckRequest {
    message_id: Uuid,
}

async fn ack_message(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<AckRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let acked = state.mailbox.ack(&device_id, req.message_id).await?;
    Ok(Json(serde_json::json!({ "acked": acked })))
}

// ── Jobs ────────────────────────────────────────────────────────────────

fn default_action() -> JobAction {
    JobAction::Like
}

#[derive(Debug, Deserialize)]
struct DispatchRequest {
    target_url: String,
    #[serde(default = "default_action")]
    action: JobAction,
}

async fn dispatch_job(
    State(state): State<AppState>,
    Json(req): Json<DispatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .dispatcher
        .create_and_dispatch(&req.target_url, req.action)
        .await?;

    info!(job_id = %job.job_id, devices = job.target_device_count, "Dispatch request served");

    Ok(Json(serde_json::json!({
        "job_id": job.job_id,
        "target_url": job.target_url,
        "target_id": job.target_id,
        "action": job.action,
        "devices_targeted": job.target_device_count,
    })))
}

#[derive(Debug, Deserialize)]
struct ResultRequest {
    job_id: Uuid,
    device_id: String,
    success: bool,
    error_message: Option<String>,
}

async fn report_result(
    State(state): State<AppState>,
    Json(req): Json<ResultRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .aggregator
        .record_result(
            req.job_id,
            &req.device_id,
            req.success,
            req.error_message.as_deref(),
        )
        .await?;

    Ok(Json(serde_json::json!({ "accepted": true })))
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let (job, assignments) = state.reporter.job_status(job_id).await?;

    let assignment_views: Vec<serde_json::Value> = assignments
        .iter()
        .map(|a| {
            serde_json::json!({
                "device_id": a.device_id,
                "status": a.status,
                "assigned_at": a.assigned_at,
                "completed_at": a.completed_at,
                "error_message": a.error_message,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "job_id": job.job_id,
        "target_url": job.target_url,
        "target_id": job.target_id,
        "action": job.action,
        "status": job.status,
        "created_at": job.created_at,
        "target_device_count": job.target_device_count,
        "completed_count": job.completed_count,
        "failed_count": job.failed_count,
        "assignments": assignment_views,
    })))
}
