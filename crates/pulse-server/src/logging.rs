use crate::api::error_response;
use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Header carrying the per-request trace id back to the caller.
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// Trace id of the current request, stored in request extensions.
#[derive(Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

/// 16 hex characters from 8 random bytes.
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

const MAX_BODY_LOG_CHARS: usize = 200;

/// Largest request body buffered for logging; ingestion batches are small.
pub const MAX_REQUEST_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Truncates to at most `max` bytes on a char boundary.
fn truncate_body(bytes: &[u8], max: usize) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.len() > max => {
            let mut end = max;
            while end > 0 && !s.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &s[..end])
        }
        Ok(s) => s.to_string(),
        Err(_) => "<non-utf8 body>".to_string(),
    }
}

fn format_elapsed(elapsed_us: u128) -> String {
    if elapsed_us < 1000 {
        format!("{elapsed_us}µs")
    } else if elapsed_us < 1_000_000 {
        format!("{}ms", elapsed_us / 1000)
    } else {
        format!("{:.1}s", elapsed_us as f64 / 1_000_000.0)
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false)
}

fn snippet(bytes: &Bytes) -> String {
    if bytes.is_empty() {
        String::new()
    } else {
        truncate_body(bytes, MAX_BODY_LOG_CHARS)
    }
}

fn log_response(trace_id: &str, status: StatusCode, elapsed: &str, body: &str) {
    let status_code = status.as_u16();
    if status.is_server_error() {
        tracing::error!(trace_id = %trace_id, status = status_code, elapsed = %elapsed, body = %body, "<-- response");
    } else if status.is_client_error() {
        tracing::warn!(trace_id = %trace_id, status = status_code, elapsed = %elapsed, body = %body, "<-- response");
    } else {
        tracing::info!(trace_id = %trace_id, status = status_code, elapsed = %elapsed, "<-- response");
        tracing::debug!(trace_id = %trace_id, body = %body, "response body");
    }
}

/// Request/response logging middleware. Assigns the trace id, logs both
/// directions and echoes the id in [`TRACE_ID_HEADER`].
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let method = req.method().clone();
    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    // Buffer JSON request bodies so they can be logged and replayed.
    let (req, req_body) = if is_json(req.headers()) {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(trace_id = %trace_id, method = %method, path = %url, error = %e, "--> request body rejected");
                let mut response = error_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    &trace_id,
                    "payload_too_large",
                    &format!("request body exceeds {MAX_REQUEST_BODY_BYTES} bytes"),
                );
                if let Ok(val) = HeaderValue::from_str(&trace_id) {
                    response.headers_mut().insert(TRACE_ID_HEADER, val);
                }
                return response;
            }
        };
        let logged = snippet(&bytes);
        (Request::from_parts(parts, Body::from(bytes)), logged)
    } else {
        (req, String::new())
    };

    if req_body.is_empty() {
        tracing::info!(trace_id = %trace_id, method = %method, path = %url, "--> request");
    } else {
        tracing::info!(trace_id = %trace_id, method = %method, path = %url, body = %req_body, "--> request");
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = format_elapsed(start.elapsed().as_micros());

    let status = response.status();
    let (parts, body) = response.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    let resp_body = if is_json(&parts.headers) {
        snippet(&body_bytes)
    } else {
        String::new()
    };
    log_response(&trace_id, status, &elapsed, &resp_body);

    let mut response = Response::from_parts(parts, Body::from(body_bytes));
    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, val);
    }
    response
}
