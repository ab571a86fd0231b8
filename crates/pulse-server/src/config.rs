use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable overriding `data_dir`.
pub const DATA_DIR_ENV: &str = "PULSE_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Directory holding `pulse.db`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Stream kind routed to the rankings snapshot instead of a stream table.
    #[serde(default = "default_rankings_stream_kind")]
    pub rankings_stream_kind: String,
    /// Allowed CORS origins; empty allows any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

fn default_http_port() -> u16 {
    5000
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_rankings_stream_kind() -> String {
    pulse_storage::metrics::DEFAULT_RANKINGS_STREAM_KIND.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            rankings_stream_kind: default_rankings_stream_kind(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads the TOML file at `path` (defaults when absent) and applies
    /// environment overrides.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)?
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Self::default()
        };
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                config.data_dir = dir;
            }
        }
        Ok(config)
    }
}
