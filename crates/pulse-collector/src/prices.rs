use crate::error::{FetchError, Result};
use crate::rate_limit::RateLimiter;
use crate::Collector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_common::types::{MetricSample, MetricValue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_SOURCE_ID: &str = "device_3";
pub const DEFAULT_STREAM_KIND: &str = "crypto_prices";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct PriceSettings {
    pub source_id: String,
    pub stream_kind: String,
    pub url: String,
    pub assets: Vec<String>,
    pub vs_currency: String,
    pub interval: Duration,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            source_id: DEFAULT_SOURCE_ID.to_string(),
            stream_kind: DEFAULT_STREAM_KIND.to_string(),
            url: "https://api.coingecko.com/api/v3/simple/price".to_string(),
            assets: vec!["bitcoin".to_string(), "ethereum".to_string()],
            vs_currency: "usd".to_string(),
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Spot prices for a fixed basket of assets from a simple-price endpoint.
pub struct PriceCollector {
    settings: PriceSettings,
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl PriceCollector {
    pub fn new(settings: PriceSettings, client: reqwest::Client) -> Self {
        let limiter = RateLimiter::new(settings.interval);
        Self {
            settings,
            client,
            limiter,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    async fn fetch(&self) -> Result<BTreeMap<String, MetricValue>> {
        let ids = self.settings.assets.join(",");
        let resp = self
            .client
            .get(&self.settings.url)
            .query(&[
                ("ids", ids.as_str()),
                ("vs_currencies", self.settings.vs_currency.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                upstream: "prices".to_string(),
                status: status.as_u16(),
            });
        }

        let body: Value = resp.json().await?;
        flatten_prices(&body, &self.settings.assets, &self.settings.vs_currency)
    }

    /// Samples as of `now`; see [`crate::rankings::RankingsCollector::sample_at`].
    pub async fn sample_at(&mut self, now: DateTime<Utc>) -> Option<MetricSample> {
        if !self.limiter.is_due(now) {
            tracing::debug!(
                source_id = %self.settings.source_id,
                remaining_secs = self.limiter.remaining(now).num_seconds(),
                "Prices not due yet"
            );
            return None;
        }

        match self.fetch().await {
            Ok(values) => {
                self.limiter.mark_success(now);
                Some(MetricSample::with_captured_at(
                    &self.settings.source_id,
                    &self.settings.stream_kind,
                    values,
                    now,
                ))
            }
            Err(e) => {
                tracing::warn!(
                    source_id = %self.settings.source_id,
                    error = %e,
                    "Price fetch failed"
                );
                None
            }
        }
    }
}

#[async_trait]
impl Collector for PriceCollector {
    fn source_id(&self) -> &str {
        &self.settings.source_id
    }

    fn stream_kind(&self) -> &str {
        &self.settings.stream_kind
    }

    async fn sample(&mut self) -> Option<MetricSample> {
        self.sample_at(Utc::now()).await
    }
}

/// Flattens `{asset: {currency: price}}` into `{asset}_{currency}` values.
/// Every requested asset must be present.
///
/// # Examples
///
/// ```
/// use pulse_collector::prices::flatten_prices;
/// use serde_json::json;
///
/// let body = json!({"bitcoin": {"usd": 64000.5}, "ethereum": {"usd": 3100}});
/// let assets = vec!["bitcoin".to_string(), "ethereum".to_string()];
/// let values = flatten_prices(&body, &assets, "usd").unwrap();
/// assert_eq!(values["bitcoin_usd"].as_f64(), Some(64000.5));
/// assert_eq!(values["ethereum_usd"].as_f64(), Some(3100.0));
/// ```
pub fn flatten_prices(
    body: &Value,
    assets: &[String],
    vs_currency: &str,
) -> Result<BTreeMap<String, MetricValue>> {
    assets
        .iter()
        .map(|asset| -> Result<(String, MetricValue)> {
            let price = body
                .get(asset)
                .and_then(|quote| quote.get(vs_currency))
                .and_then(Value::as_f64)
                .ok_or_else(|| {
                    FetchError::Payload(format!("missing {vs_currency} price for {asset}"))
                })?;
            Ok((format!("{asset}_{vs_currency}"), MetricValue::Number(price)))
        })
        .collect()
}
