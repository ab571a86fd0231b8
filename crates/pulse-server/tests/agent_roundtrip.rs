mod common;

use async_trait::async_trait;
use common::{build_test_context, request_no_body};
use pulse_agent::agent::CollectionAgent;
use pulse_agent::link::HttpServerLink;
use pulse_collector::system::SystemCollector;
use pulse_collector::{build_http_client, Collector};
use pulse_common::types::{encode_rankings, CommandStatus, MetricSample, RankingEntry, RANKINGS_VALUE_KEY};
use std::collections::BTreeMap;
use std::time::Duration;

struct FixedRankings;

#[async_trait]
impl Collector for FixedRankings {
    fn source_id(&self) -> &str {
        "device_1"
    }

    fn stream_kind(&self) -> &str {
        "uefa_rankings"
    }

    async fn sample(&mut self) -> Option<MetricSample> {
        let entries = vec![
            RankingEntry {
                team: "Real Madrid".to_string(),
                points: 136.0,
            },
            RankingEntry {
                team: "Manchester City".to_string(),
                points: 130.0,
            },
        ];
        Some(MetricSample::new(
            "device_1",
            "uefa_rankings",
            BTreeMap::from([(RANKINGS_VALUE_KEY.to_string(), encode_rankings(&entries))]),
        ))
    }
}

#[tokio::test]
async fn agent_cycle_reaches_server_and_completes_commands() {
    let ctx = build_test_context().expect("context should build");
    let app = ctx.app.clone();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server should run");
    });

    let queued = ctx
        .state
        .commands
        .create("device_1", "status")
        .expect("command should queue");

    let client = build_http_client(Duration::from_secs(5)).expect("client should build");
    let link = HttpServerLink::new(&format!("http://{addr}"), client);
    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(SystemCollector::new("device_1", "system_metrics")),
        Box::new(FixedRankings),
    ];
    let mut agent = CollectionAgent::new(collectors, Box::new(link), Duration::from_secs(300));

    let report = agent.run_cycle().await;
    assert_eq!(report.collected, 2);
    assert_eq!(report.sent, 2);
    assert_eq!(report.commands, 1);

    let latest = ctx
        .state
        .metrics
        .latest("device_1", "system_metrics")
        .expect("stream should exist")
        .expect("row should exist");
    assert!(latest.values.contains_key("ram_usage"));
    assert!(latest.values.contains_key("thread_count"));

    let rankings = ctx.state.metrics.list_rankings().expect("rankings should list");
    assert_eq!(rankings.len(), 2);
    assert_eq!(rankings[0].team, "Real Madrid");

    let done = ctx
        .state
        .commands
        .get(&queued.id)
        .expect("lookup should succeed")
        .expect("command should exist");
    assert_eq!(done.status, CommandStatus::Completed);
    let response = done.response.expect("response should be recorded");
    let status: serde_json::Value =
        serde_json::from_str(&response).expect("status response should be JSON");
    assert_eq!(status["cycles"], 0);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/device/commands/device_1").await;
    let history = body["data"].as_array().expect("history should be a list");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["status"], "completed");
    assert!(!history[0]["response"].is_null());

    // nothing left to execute on the next cycle
    let report = agent.run_cycle().await;
    assert_eq!(report.commands, 0);

    server.abort();
}
