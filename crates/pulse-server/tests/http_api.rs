mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{
    assert_err_envelope, assert_ok_envelope, build_test_context, request_json, request_no_body,
    request_raw,
};
use pulse_common::types::MetricValue;
use pulse_server::logging::MAX_REQUEST_BODY_BYTES;
use serde_json::json;
use std::collections::BTreeMap;

#[tokio::test]
async fn ingest_then_query_latest_and_history() {
    let ctx = build_test_context().expect("context should build");

    let (status, body, trace_id) = request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({"sourceId": "s1", "streamKind": "sys", "values": {"ram_usage": 40.5, "thread_count": 7}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["stored"], 1);
    assert_eq!(trace_id.as_deref(), body["trace_id"].as_str());

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({"device_id": "s1", "metric_type": "sys", "values": {"ram_usage": 41.0, "thread_count": 9}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/metrics/s1/sys").await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["ram_usage"], 41.0);
    assert_eq!(body["data"]["thread_count"], 9.0);
    assert!(body["data"]["id"].is_i64());

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/metrics/history/s1/sys").await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["range"], "24h");
    let rows = body["data"]["rows"].as_array().expect("rows should be a list");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["ram_usage"], 40.5);
    assert_eq!(rows[1]["ram_usage"], 41.0);
}

#[tokio::test]
async fn history_range_selects_window() {
    let ctx = build_test_context().expect("context should build");
    let old = Utc::now() - Duration::days(3);

    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({
            "metrics": [
                {"sourceId": "s2", "streamKind": "sys", "values": {"ram_usage": 10}, "timestamp": old},
                {"sourceId": "s2", "streamKind": "sys", "values": {"ram_usage": 20}}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, day, _) = request_no_body(&ctx.app, "GET", "/metrics/history/s2/sys").await;
    assert_eq!(day["data"]["rows"].as_array().map(Vec::len), Some(1));

    let (_, week, _) = request_no_body(&ctx.app, "GET", "/metrics/history/s2/sys?range=7d").await;
    assert_eq!(week["data"]["range"], "7d");
    let rows = week["data"]["rows"].as_array().expect("rows should be a list");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["ram_usage"], 10.0);

    let (_, fallback, _) =
        request_no_body(&ctx.app, "GET", "/metrics/history/s2/sys?range=forever").await;
    assert_eq!(fallback["data"]["range"], "24h");
}

#[tokio::test]
async fn invalid_snapshots_are_rejected() {
    let ctx = build_test_context().expect("context should build");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({"streamKind": "sys", "values": {"a": 1}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);
    assert!(body["err_msg"].as_str().unwrap_or_default().contains("sourceId"));

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({"sourceId": "s1", "streamKind": "sys", "values": {}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({"sourceId": "bad id;", "streamKind": "sys", "values": {"a": 1}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_raw(&ctx.app, "POST", "/metrics/snapshot", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    // one bad entry rejects the whole batch
    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({
            "metrics": [
                {"sourceId": "s3", "streamKind": "sys", "values": {"a": 1}},
                {"sourceId": "s3", "values": {"a": 2}}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = request_no_body(&ctx.app, "GET", "/metrics/s3/sys").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_and_empty_streams() {
    let ctx = build_test_context().expect("context should build");

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/metrics/nobody/sys").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/metrics/history/nobody/sys").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);

    let values = BTreeMap::from([("ram_usage".to_string(), MetricValue::Number(1.0))]);
    ctx.state
        .metrics
        .ensure_table("idle", "sys", &values)
        .expect("table should be created");

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/metrics/idle/sys").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["err_code"], 0);
    assert_eq!(body["err_msg"], "no data");
    assert!(body["data"].is_null());

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/metrics/history/idle/sys").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["rows"], json!([]));
}

#[tokio::test]
async fn streams_are_discoverable() {
    let ctx = build_test_context().expect("context should build");

    request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({"sourceId": "s1", "streamKind": "sys", "values": {"ram_usage": 1, "label": "x"}}),
    )
    .await;

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/metrics/streams").await;
    assert_eq!(status, StatusCode::OK);
    let streams = body["data"].as_array().expect("streams should be a list");
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0]["source_id"], "s1");
    assert_eq!(streams[0]["stream_kind"], "sys");
    assert_eq!(streams[0]["columns"]["ram_usage"], "numeric");
    assert_eq!(streams[0]["columns"]["label"], "text");
}

#[tokio::test]
async fn rankings_snapshot_replaces_previous() {
    let ctx = build_test_context().expect("context should build");

    let first = json!([{"team": "A", "points": 10.0}, {"team": "B", "points": 30.0}]).to_string();
    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({"sourceId": "device_1", "streamKind": "uefa_rankings", "values": {"rankings": first}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/uefa-rankings").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().expect("rankings should be a list");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["team"], "B");

    let second = json!([{"team": "C", "points": 5.0}]).to_string();
    request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({"sourceId": "device_1", "streamKind": "uefa_rankings", "values": {"rankings": second}}),
    )
    .await;

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/uefa-rankings").await;
    let rows = body["data"].as_array().expect("rankings should be a list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["team"], "C");
    assert_eq!(rows[0]["source_id"], "device_1");

    // rankings never become a queryable stream
    let (status, _, _) = request_no_body(&ctx.app, "GET", "/metrics/device_1/uefa_rankings").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn command_lifecycle_over_http() {
    let ctx = build_test_context().expect("context should build");

    let (status, body, _) =
        request_json(&ctx.app, "POST", "/device/command/dev1", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);
    assert_eq!(body["err_msg"], "command is required");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/device/command/dev1",
        json!({"command": "   "}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/device/command/dev1",
        json!({"command": "ping"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["status"], "pending");
    let cmd_id = body["data"]["id"]
        .as_str()
        .expect("id should be present")
        .to_string();

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/device/commands/dev1/pending").await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    // another source cannot complete it
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/device/commands/dev2/{cmd_id}/result"),
        json!({"status": "completed", "response": "pong"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/device/commands/dev1/{cmd_id}/result"),
        json!({"status": "pending"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/device/commands/dev1/{cmd_id}/result"),
        json!({"status": "completed", "response": "pong"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["response"], "pong");
    assert!(body["data"]["executed_at"].is_string());

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/device/commands/dev1/{cmd_id}/result"),
        json!({"status": "failed"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_err_envelope(&body, 1005);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/device/commands/dev1/missing/result",
        json!({"status": "completed"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/device/commands/dev1/pending").await;
    assert_eq!(body["data"], json!([]));
    let (_, body, _) = request_no_body(&ctx.app, "GET", "/device/commands/dev1").await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn health_and_openapi() {
    let ctx = build_test_context().expect("context should build");

    let (status, body, trace_id) = request_no_body(&ctx.app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["storage_status"], "ok");
    assert_eq!(body["data"]["stream_count"], 0);
    assert_eq!(trace_id.map(|t| t.len()), Some(16));

    let (status, spec, _) = request_no_body(&ctx.app, "GET", "/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    let paths = spec["paths"].as_object().expect("paths should be an object");
    for path in [
        "/health",
        "/metrics/snapshot",
        "/metrics/streams",
        "/metrics/{source_id}/{stream_kind}",
        "/metrics/history/{source_id}/{stream_kind}",
        "/uefa-rankings",
        "/device/command/{source_id}",
        "/device/commands/{source_id}",
        "/device/commands/{source_id}/pending",
        "/device/commands/{source_id}/{command_id}/result",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
}

#[tokio::test]
async fn oversized_json_body_is_payload_too_large() {
    let ctx = build_test_context().expect("context should build");

    let body = format!("\"{}\"", "x".repeat(MAX_REQUEST_BODY_BYTES));
    let (status, body, trace_id) = request_raw(&ctx.app, "POST", "/metrics/snapshot", &body).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_err_envelope(&body, 1013);
    assert_eq!(trace_id.as_deref(), body["trace_id"].as_str());
}

#[tokio::test]
async fn case_variant_of_existing_stream_is_rejected() {
    let ctx = build_test_context().expect("context should build");

    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({"sourceId": "s1", "streamKind": "sys", "values": {"ram": 42}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({"sourceId": "S1", "streamKind": "sys", "values": {"ram": 99}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/metrics/snapshot",
        json!({"sourceId": "s2", "streamKind": "sys", "values": {"ram": 1, "RAM": 2}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/metrics/s1/sys").await;
    assert_eq!(body["data"]["ram"], 42.0);
}
