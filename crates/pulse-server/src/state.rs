use crate::config::ServerConfig;
use chrono::{DateTime, Utc};
use pulse_storage::{CommandStore, MetricStore};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<MetricStore>,
    pub commands: Arc<CommandStore>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Opens both stores under `config.data_dir`.
    pub fn open(config: ServerConfig) -> anyhow::Result<Self> {
        let data_dir = Path::new(&config.data_dir);
        let metrics = MetricStore::with_rankings_stream_kind(data_dir, &config.rankings_stream_kind)?;
        let commands = CommandStore::new(data_dir)?;
        Ok(Self {
            metrics: Arc::new(metrics),
            commands: Arc::new(commands),
            start_time: Utc::now(),
            config: Arc::new(config),
        })
    }
}
