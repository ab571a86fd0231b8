use crate::api::{
    error_response, storage_error_response, success_empty_response, success_response, ApiError,
};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use pulse_common::types::{IngestRequest, StreamRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Serialize, ToSchema)]
struct StoredResponse {
    /// Number of samples persisted.
    stored: usize,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryParams {
    /// `24h` (default), `7d` or `30d`.
    #[param(required = false)]
    pub range: Option<String>,
}

/// Lookback window of a history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRange {
    Day,
    Week,
    Month,
}

impl HistoryRange {
    /// Unknown or missing values fall back to 24h.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("7d") => HistoryRange::Week,
            Some("30d") => HistoryRange::Month,
            _ => HistoryRange::Day,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HistoryRange::Day => "24h",
            HistoryRange::Week => "7d",
            HistoryRange::Month => "30d",
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            HistoryRange::Day => Duration::hours(24),
            HistoryRange::Week => Duration::days(7),
            HistoryRange::Month => Duration::days(30),
        }
    }
}

#[derive(Serialize, ToSchema)]
struct HistoryResponse {
    source_id: String,
    stream_kind: String,
    range: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    /// Rows in ascending time order; each carries `id`, `timestamp` and the
    /// stream's value columns.
    #[schema(value_type = Vec<Object>)]
    rows: Vec<StreamRow>,
}

#[derive(Serialize, ToSchema)]
struct StreamSummary {
    table: String,
    source_id: String,
    stream_kind: String,
    /// Column name to `numeric` or `text`.
    columns: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
}

/// Ingest one snapshot or a batch of snapshots.
///
/// The whole body is stored atomically; an invalid entry rejects the batch.
#[utoipa::path(
    post,
    path = "/metrics/snapshot",
    tag = "Metrics",
    request_body = IngestRequest,
    responses(
        (status = 200, description = "Samples stored", body = StoredResponse),
        (status = 400, description = "Missing or invalid fields", body = ApiError),
        (status = 500, description = "Storage failure", body = ApiError)
    )
)]
async fn ingest_snapshot(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &rejection.body_text(),
            )
        }
    };

    let samples = match request.into_samples(Utc::now()) {
        Ok(samples) => samples,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &msg),
    };

    match state.metrics.ingest(&samples) {
        Ok(stored) => success_response(StatusCode::OK, &trace_id, StoredResponse { stored }),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

/// Latest row of a stream.
///
/// An existing but empty stream answers `data: null` with message `no data`.
#[utoipa::path(
    get,
    path = "/metrics/{source_id}/{stream_kind}",
    tag = "Metrics",
    params(
        ("source_id" = String, Path, description = "Source identity"),
        ("stream_kind" = String, Path, description = "Stream kind")
    ),
    responses(
        (status = 200, description = "Latest row (id, timestamp and values)", body = serde_json::Value),
        (status = 404, description = "Unknown stream", body = ApiError)
    )
)]
async fn latest_metric(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((source_id, stream_kind)): Path<(String, String)>,
) -> Response {
    match state.metrics.latest(&source_id, &stream_kind) {
        Ok(Some(row)) => success_response(StatusCode::OK, &trace_id, row),
        Ok(None) => success_empty_response(StatusCode::OK, &trace_id, "no data"),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

/// Rows of a stream within a window ending now, ascending.
#[utoipa::path(
    get,
    path = "/metrics/history/{source_id}/{stream_kind}",
    tag = "Metrics",
    params(
        ("source_id" = String, Path, description = "Source identity"),
        ("stream_kind" = String, Path, description = "Stream kind"),
        HistoryParams
    ),
    responses(
        (status = 200, description = "Rows in the window", body = HistoryResponse),
        (status = 404, description = "Unknown stream", body = ApiError)
    )
)]
async fn metric_history(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((source_id, stream_kind)): Path<(String, String)>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let range = HistoryRange::parse(params.range.as_deref());
    // end is exclusive; include rows captured in the current millisecond
    let end = Utc::now() + Duration::milliseconds(1);
    let start = end - range.duration();

    match state.metrics.range(&source_id, &stream_kind, start, end) {
        Ok(rows) => success_response(
            StatusCode::OK,
            &trace_id,
            HistoryResponse {
                source_id,
                stream_kind,
                range: range.as_str().to_string(),
                start,
                end,
                rows,
            },
        ),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

/// Every known stream with its column schema.
#[utoipa::path(
    get,
    path = "/metrics/streams",
    tag = "Metrics",
    responses(
        (status = 200, description = "Known streams", body = Vec<StreamSummary>)
    )
)]
async fn list_streams(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    match state.metrics.list_streams() {
        Ok(streams) => {
            let items: Vec<StreamSummary> = streams
                .into_iter()
                .map(|s| StreamSummary {
                    table: s.table,
                    source_id: s.source_id,
                    stream_kind: s.stream_kind,
                    columns: s
                        .columns
                        .into_iter()
                        .map(|(name, ty)| (name, ty.as_str().to_string()))
                        .collect(),
                    created_at: s.created_at,
                })
                .collect();
            success_response(StatusCode::OK, &trace_id, items)
        }
        Err(e) => storage_error_response(&trace_id, e),
    }
}

pub fn metric_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(ingest_snapshot))
        .routes(routes!(list_streams))
        .routes(routes!(latest_metric))
        .routes(routes!(metric_history))
}
