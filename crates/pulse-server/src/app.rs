use crate::state::AppState;
use crate::{api, logging};
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "pulse API",
        description = "Metric stream ingestion, queries and device commands",
    ),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Metrics", description = "Snapshot ingestion and stream queries"),
        (name = "Rankings", description = "Current rankings snapshot"),
        (name = "Commands", description = "Device command queue")
    )
)]
struct ApiDoc;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

pub fn build_http_app(state: AppState) -> Router {
    let (router, api_spec) = api::api_routes().split_for_parts();

    let mut merged_spec = ApiDoc::openapi();
    merged_spec.merge(api_spec);
    let spec = Arc::new(merged_spec);

    let cors = cors_layer(&state.config.cors_allowed_origins);

    router
        .with_state(state)
        .route(
            "/openapi.json",
            get(move || {
                let spec = spec.clone();
                async move { Json(spec.as_ref().clone()) }
            }),
        )
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}
