pub mod commands;
pub mod metrics;
pub mod rankings;

use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use pulse_storage::StorageError;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Error envelope.
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    /// Custom error code (non-zero).
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
}

/// Envelope wrapped around every JSON response.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 0 on success.
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

pub fn success_empty_response(status: StatusCode, trace_id: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: 0,
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "conflict" => 1005,
        "payload_too_large" => 1013,
        "storage_error" => 1501,
        "internal_error" => 1500,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

/// Maps a storage failure onto the envelope: validation 400, missing 404,
/// repeated transition 409, everything else 500.
pub fn storage_error_response(trace_id: &str, err: StorageError) -> Response {
    match err {
        StorageError::Validation(msg) => {
            error_response(StatusCode::BAD_REQUEST, trace_id, "bad_request", &msg)
        }
        StorageError::NotFound { .. } => error_response(
            StatusCode::NOT_FOUND,
            trace_id,
            "not_found",
            &err.to_string(),
        ),
        StorageError::InvalidTransition { .. } => {
            error_response(StatusCode::CONFLICT, trace_id, "conflict", &err.to_string())
        }
        other => {
            tracing::error!(trace_id = %trace_id, error = %other, "Storage failure");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                &other.to_string(),
            )
        }
    }
}

#[derive(Serialize, ToSchema)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    /// Number of stream tables known to the store.
    stream_count: u64,
    storage_status: String,
}

/// Service health.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    let (stream_count, storage_status) = match state.metrics.stream_count() {
        Ok(count) => (count, "ok".to_string()),
        Err(e) => {
            tracing::error!(error = %e, "Health check could not query storage");
            (0, "error".to_string())
        }
    };
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
            stream_count,
            storage_status,
        },
    )
}

pub fn api_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .merge(metrics::metric_routes())
        .merge(rankings::rankings_routes())
        .merge(commands::command_routes())
}
