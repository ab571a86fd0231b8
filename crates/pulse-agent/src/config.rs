use pulse_collector::prices::{self, PriceSettings};
use pulse_collector::rankings::{self, RankingsSettings};
use pulse_collector::system;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `rankings.api_key`.
pub const RAPIDAPI_KEY_ENV: &str = "PULSE_RAPIDAPI_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,
    /// Timeout for calls to the server and to third-party APIs.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub system: SystemSection,
    #[serde(default)]
    pub rankings: RankingsSection,
    #[serde(default)]
    pub prices: PricesSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_system_source")]
    pub source_id: String,
    #[serde(default = "default_system_stream")]
    pub stream_kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rankings_source")]
    pub source_id: String,
    #[serde(default = "default_rankings_stream")]
    pub stream_kind: String,
    #[serde(default = "default_rankings_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_rankings_host")]
    pub api_host: String,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_rankings_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricesSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_prices_source")]
    pub source_id: String,
    #[serde(default = "default_prices_stream")]
    pub stream_kind: String,
    #[serde(default = "default_prices_url")]
    pub url: String,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
    #[serde(default = "default_vs_currency")]
    pub vs_currency: String,
    #[serde(default = "default_prices_interval")]
    pub interval_secs: u64,
}

fn default_server_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_collection_interval() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_system_source() -> String {
    system::DEFAULT_SOURCE_ID.to_string()
}

fn default_system_stream() -> String {
    system::DEFAULT_STREAM_KIND.to_string()
}

fn default_rankings_source() -> String {
    rankings::DEFAULT_SOURCE_ID.to_string()
}

fn default_rankings_stream() -> String {
    rankings::DEFAULT_STREAM_KIND.to_string()
}

fn default_rankings_url() -> String {
    RankingsSettings::default().url
}

fn default_rankings_host() -> String {
    RankingsSettings::default().api_host
}

fn default_top_n() -> usize {
    rankings::DEFAULT_TOP_N
}

fn default_rankings_interval() -> u64 {
    rankings::DEFAULT_INTERVAL.as_secs()
}

fn default_prices_source() -> String {
    prices::DEFAULT_SOURCE_ID.to_string()
}

fn default_prices_stream() -> String {
    prices::DEFAULT_STREAM_KIND.to_string()
}

fn default_prices_url() -> String {
    PriceSettings::default().url
}

fn default_assets() -> Vec<String> {
    PriceSettings::default().assets
}

fn default_vs_currency() -> String {
    PriceSettings::default().vs_currency
}

fn default_prices_interval() -> u64 {
    prices::DEFAULT_INTERVAL.as_secs()
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            enabled: true,
            source_id: default_system_source(),
            stream_kind: default_system_stream(),
        }
    }
}

impl Default for RankingsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            source_id: default_rankings_source(),
            stream_kind: default_rankings_stream(),
            url: default_rankings_url(),
            api_key: String::new(),
            api_host: default_rankings_host(),
            top_n: default_top_n(),
            interval_secs: default_rankings_interval(),
        }
    }
}

impl Default for PricesSection {
    fn default() -> Self {
        Self {
            enabled: true,
            source_id: default_prices_source(),
            stream_kind: default_prices_stream(),
            url: default_prices_url(),
            assets: default_assets(),
            vs_currency: default_vs_currency(),
            interval_secs: default_prices_interval(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            collection_interval_secs: default_collection_interval(),
            request_timeout_secs: default_request_timeout(),
            system: SystemSection::default(),
            rankings: RankingsSection::default(),
            prices: PricesSection::default(),
        }
    }
}

impl AgentConfig {
    /// Loads the TOML file at `path`, falling back to defaults when it does
    /// not exist, then applies environment overrides.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)?
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(RAPIDAPI_KEY_ENV) {
            if !key.trim().is_empty() {
                self.rankings.api_key = key;
            }
        }
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn rankings_settings(&self) -> RankingsSettings {
        RankingsSettings {
            source_id: self.rankings.source_id.clone(),
            stream_kind: self.rankings.stream_kind.clone(),
            url: self.rankings.url.clone(),
            api_key: self.rankings.api_key.clone(),
            api_host: self.rankings.api_host.clone(),
            top_n: self.rankings.top_n,
            interval: Duration::from_secs(self.rankings.interval_secs),
        }
    }

    pub fn price_settings(&self) -> PriceSettings {
        PriceSettings {
            source_id: self.prices.source_id.clone(),
            stream_kind: self.prices.stream_kind.clone(),
            url: self.prices.url.clone(),
            assets: self.prices.assets.clone(),
            vs_currency: self.prices.vs_currency.clone(),
            interval: Duration::from_secs(self.prices.interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.server_url, "http://127.0.0.1:5000");
        assert_eq!(config.collection_interval_secs, 300);
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.rankings.top_n, 6);
        assert_eq!(config.rankings.interval_secs, 3600);
        assert_eq!(config.prices.assets, vec!["bitcoin", "ethereum"]);
        assert_eq!(config.prices.interval_secs, 300);
        assert_eq!(config.system.source_id, "device_1");
    }

    #[test]
    fn sections_override_individual_fields() {
        let config: AgentConfig = toml::from_str(
            r#"
            server_url = "http://collector:8080"
            collection_interval_secs = 30

            [rankings]
            enabled = false
            top_n = 3

            [prices]
            assets = ["solana"]
            vs_currency = "eur"
            "#,
        )
        .unwrap();
        assert_eq!(config.collection_interval(), Duration::from_secs(30));
        assert!(!config.rankings.enabled);
        assert_eq!(config.rankings_settings().top_n, 3);
        assert_eq!(config.rankings.source_id, "device_2");
        let prices = config.price_settings();
        assert_eq!(prices.assets, vec!["solana"]);
        assert_eq!(prices.vs_currency, "eur");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        let config = AgentConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.collection_interval_secs, 300);
    }

    #[test]
    fn load_reads_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "collection_interval_secs = 5\n[system]\nsource_id = \"pc_9\"\n")
            .unwrap();
        let config = AgentConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.collection_interval_secs, 5);
        assert_eq!(config.system.source_id, "pc_9");
        assert!(config.system.enabled);
    }
}
