//! The pulse collection agent.
//!
//! A [`agent::CollectionAgent`] owns the registered collectors, stages their
//! samples in a [`queue::StagingQueue`], uploads one batch per cycle through a
//! [`link::ServerLink`] and executes pending device commands.

pub mod agent;
pub mod commands;
pub mod config;
pub mod link;
pub mod queue;

use config::AgentConfig;
use pulse_collector::prices::PriceCollector;
use pulse_collector::rankings::RankingsCollector;
use pulse_collector::system::SystemCollector;
use pulse_collector::Collector;

/// Instantiates the collectors enabled in `config`.
pub fn build_collectors(config: &AgentConfig, client: &reqwest::Client) -> Vec<Box<dyn Collector>> {
    let mut collectors: Vec<Box<dyn Collector>> = Vec::new();
    if config.system.enabled {
        collectors.push(Box::new(SystemCollector::new(
            &config.system.source_id,
            &config.system.stream_kind,
        )));
    }
    if config.rankings.enabled {
        if config.rankings.api_key.is_empty() {
            tracing::warn!(
                "Rankings collector enabled without an API key; set rankings.api_key or {}",
                config::RAPIDAPI_KEY_ENV
            );
        }
        collectors.push(Box::new(RankingsCollector::new(
            config.rankings_settings(),
            client.clone(),
        )));
    }
    if config.prices.enabled {
        collectors.push(Box::new(PriceCollector::new(
            config.price_settings(),
            client.clone(),
        )));
    }
    collectors
}
