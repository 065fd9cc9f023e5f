use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use super::AppState;
use crate::errors::AppError;
use crate::models::{
    ChannelCreateRequest, Job, JobCreateRequest, JobNotification, JobUpdateRequest,
    NotificationChannel, PingResponse, SweepSummary,
};

type ApiError = (StatusCode, Json<Value>);

fn error_response(err: AppError) -> ApiError {
    let status = match &err {
        AppError::Validation { .. } => StatusCode::BAD_REQUEST,
        AppError::NotFound { .. } => StatusCode::NOT_FOUND,
        AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", err);
    }
    (status, Json(json!({ "error": err.to_string() })))
}

// Health

pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match state.database.health_check().await {
        Ok(()) => Ok(Json(json!({ "status": "ok" }))),
        Err(e) => {
            error!("Health check failed: {}", e);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error" })),
            ))
        }
    }
}

// Ping endpoints

pub async fn ping_start(
    Path(public_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PingResponse>, ApiError> {
    state
        .monitor
        .ping_start(&public_id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn ping_end(
    Path(public_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PingResponse>, ApiError> {
    state
        .monitor
        .ping_end(&public_id)
        .await
        .map(Json)
        .map_err(error_response)
}

// Jobs API

pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<Job>>, ApiError> {
    state
        .monitor
        .list_jobs()
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(payload): Json<JobCreateRequest>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    state
        .monitor
        .create_job(payload)
        .await
        .map(|job| (StatusCode::CREATED, Json(job)))
        .map_err(error_response)
}

pub async fn get_job(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Job>, ApiError> {
    state
        .monitor
        .get_job(id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn update_job(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<JobUpdateRequest>,
) -> Result<Json<Job>, ApiError> {
    state
        .monitor
        .update_job(id, payload)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn delete_job(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state
        .monitor
        .delete_job(id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

pub async fn force_run(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Job>, ApiError> {
    state
        .monitor
        .force_run(id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn force_active(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Job>, ApiError> {
    state
        .monitor
        .force_active(id)
        .await
        .map(Json)
        .map_err(error_response)
}

// Subscriptions API

pub async fn subscribe(
    Path((id, channel_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<JobNotification>), ApiError> {
    state
        .monitor
        .subscribe(id, channel_id)
        .await
        .map(|binding| (StatusCode::CREATED, Json(binding)))
        .map_err(error_response)
}

pub async fn unsubscribe(
    Path((id, channel_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state
        .monitor
        .unsubscribe(id, channel_id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

// Channels API

pub async fn list_channels(
    State(state): State<AppState>,
) -> Result<Json<Vec<NotificationChannel>>, ApiError> {
    state
        .monitor
        .list_channels()
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn create_channel(
    State(state): State<AppState>,
    Json(payload): Json<ChannelCreateRequest>,
) -> Result<(StatusCode, Json<NotificationChannel>), ApiError> {
    state
        .monitor
        .create_channel(payload)
        .await
        .map(|channel| (StatusCode::CREATED, Json(channel)))
        .map_err(error_response)
}

pub async fn delete_channel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state
        .monitor
        .delete_channel(id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

// Sweep trigger (external cadence hook)

pub async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepSummary>, ApiError> {
    state
        .sweeper
        .sweep()
        .await
        .map(Json)
        .map_err(error_response)
}
