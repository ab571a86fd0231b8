use crate::api::{error_response, storage_error_response, success_response, ApiError};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use pulse_common::types::{CommandResultRequest, CreateCommandRequest, DeviceCommand};
use utoipa_axum::{router::OpenApiRouter, routes};

fn bad_request(trace_id: &str, msg: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, trace_id, "bad_request", msg)
}

/// Queue a command for a source.
#[utoipa::path(
    post,
    path = "/device/command/{source_id}",
    tag = "Commands",
    params(("source_id" = String, Path, description = "Target source")),
    request_body = CreateCommandRequest,
    responses(
        (status = 201, description = "Command queued", body = DeviceCommand),
        (status = 400, description = "Missing command", body = ApiError)
    )
)]
async fn create_command(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(source_id): Path<String>,
    payload: Result<Json<CreateCommandRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_request(&trace_id, &rejection.body_text()),
    };
    let command = match body.command.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => return bad_request(&trace_id, "command is required"),
    };

    match state.commands.create(&source_id, &command) {
        Ok(cmd) => success_response(StatusCode::CREATED, &trace_id, cmd),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

/// Command history of a source, most recent first.
#[utoipa::path(
    get,
    path = "/device/commands/{source_id}",
    tag = "Commands",
    params(("source_id" = String, Path, description = "Target source")),
    responses(
        (status = 200, description = "Commands", body = Vec<DeviceCommand>)
    )
)]
async fn list_commands(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> Response {
    match state.commands.list_for_source(&source_id) {
        Ok(cmds) => success_response(StatusCode::OK, &trace_id, cmds),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

/// Pending commands of a source, oldest first. Polled by agents.
#[utoipa::path(
    get,
    path = "/device/commands/{source_id}/pending",
    tag = "Commands",
    params(("source_id" = String, Path, description = "Target source")),
    responses(
        (status = 200, description = "Pending commands", body = Vec<DeviceCommand>)
    )
)]
async fn pending_commands(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> Response {
    match state.commands.pending_for_source(&source_id) {
        Ok(cmds) => success_response(StatusCode::OK, &trace_id, cmds),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

/// Report the outcome of a command. A command completes exactly once.
#[utoipa::path(
    post,
    path = "/device/commands/{source_id}/{command_id}/result",
    tag = "Commands",
    params(
        ("source_id" = String, Path, description = "Source that executed the command"),
        ("command_id" = String, Path, description = "Command id")
    ),
    request_body = CommandResultRequest,
    responses(
        (status = 200, description = "Command updated", body = DeviceCommand),
        (status = 400, description = "Invalid status", body = ApiError),
        (status = 404, description = "Unknown command", body = ApiError),
        (status = 409, description = "Command already completed", body = ApiError)
    )
)]
async fn report_result(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((source_id, command_id)): Path<(String, String)>,
    payload: Result<Json<CommandResultRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_request(&trace_id, &rejection.body_text()),
    };

    // a command can only be completed through the source it was addressed to
    match state.commands.get(&command_id) {
        Ok(Some(cmd)) if cmd.source_id == source_id => {}
        Ok(_) => {
            return error_response(
                StatusCode::NOT_FOUND,
                &trace_id,
                "not_found",
                &format!("command not found: {command_id}"),
            )
        }
        Err(e) => return storage_error_response(&trace_id, e),
    }

    match state.commands.complete(
        &command_id,
        body.status,
        body.response.as_deref(),
        Utc::now(),
    ) {
        Ok(cmd) => success_response(StatusCode::OK, &trace_id, cmd),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

pub fn command_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_command))
        .routes(routes!(list_commands))
        .routes(routes!(pending_commands))
        .routes(routes!(report_result))
}
