use anyhow::Result;
use pulse_agent::agent::CollectionAgent;
use pulse_agent::build_collectors;
use pulse_agent::config::AgentConfig;
use pulse_agent::link::HttpServerLink;
use pulse_collector::build_http_client;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulse=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = AgentConfig::load(&config_path)?;
    tracing::info!(server = %config.server_url, "pulse-agent starting");

    let client = build_http_client(config.request_timeout())?;
    let collectors = build_collectors(&config, &client);
    let link = HttpServerLink::new(&config.server_url, client);

    CollectionAgent::new(collectors, Box::new(link), config.collection_interval())
        .run()
        .await;

    Ok(())
}
