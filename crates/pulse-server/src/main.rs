use anyhow::Result;
use std::net::SocketAddr;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use pulse_server::app;
use pulse_server::config::ServerConfig;
use pulse_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    pulse_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulse=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    run_server(&config_path).await
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        rankings_stream_kind = %config.rankings_stream_kind,
        "pulse-server starting"
    );

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let state = AppState::open(config)?;
    let app = app::build_http_app(state);

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(addr = %http_addr, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await?;
    Ok(())
}
