use crate::api::{storage_error_response, success_response, ApiError};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::Response;
use pulse_common::types::StoredRanking;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Current rankings snapshot, highest points first.
#[utoipa::path(
    get,
    path = "/uefa-rankings",
    tag = "Rankings",
    responses(
        (status = 200, description = "Rankings snapshot", body = Vec<StoredRanking>),
        (status = 500, description = "Storage failure", body = ApiError)
    )
)]
async fn list_rankings(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    match state.metrics.list_rankings() {
        Ok(rankings) => success_response(StatusCode::OK, &trace_id, rankings),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

pub fn rankings_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(list_rankings))
}
