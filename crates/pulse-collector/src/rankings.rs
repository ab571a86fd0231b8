use crate::error::{FetchError, Result};
use crate::rate_limit::RateLimiter;
use crate::Collector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_common::types::{encode_rankings, MetricSample, RankingEntry, RANKINGS_VALUE_KEY};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_SOURCE_ID: &str = "device_2";
pub const DEFAULT_STREAM_KIND: &str = "uefa_rankings";
pub const DEFAULT_TOP_N: usize = 6;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct RankingsSettings {
    pub source_id: String,
    pub stream_kind: String,
    pub url: String,
    pub api_key: String,
    pub api_host: String,
    pub top_n: usize,
    pub interval: Duration,
}

impl Default for RankingsSettings {
    fn default() -> Self {
        Self {
            source_id: DEFAULT_SOURCE_ID.to_string(),
            stream_kind: DEFAULT_STREAM_KIND.to_string(),
            url: "https://uefa-rankings.p.rapidapi.com/rankings/club".to_string(),
            api_key: String::new(),
            api_host: "uefa-rankings.p.rapidapi.com".to_string(),
            top_n: DEFAULT_TOP_N,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Club rankings from a RapidAPI endpoint, truncated to the top N entries.
pub struct RankingsCollector {
    settings: RankingsSettings,
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl RankingsCollector {
    pub fn new(settings: RankingsSettings, client: reqwest::Client) -> Self {
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

    async fn fetch(&self) -> Result<Vec<RankingEntry>> {
        let resp = self
            .client
            .get(&self.settings.url)
            .header("x-rapidapi-key", &self.settings.api_key)
            .header("x-rapidapi-host", &self.settings.api_host)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                upstream: "rankings".to_string(),
                status: status.as_u16(),
            });
        }

        let body: Value = resp.json().await?;
        parse_rankings(&body, self.settings.top_n)
    }

    /// Samples as of `now`. Returns `None` when not due or on fetch failure;
    /// only a successful fetch advances the rate limiter.
    pub async fn sample_at(&mut self, now: DateTime<Utc>) -> Option<MetricSample> {
        if !self.limiter.is_due(now) {
            tracing::debug!(
                source_id = %self.settings.source_id,
                remaining_secs = self.limiter.remaining(now).num_seconds(),
                "Rankings not due yet"
            );
            return None;
        }

        match self.fetch().await {
            Ok(entries) => {
                self.limiter.mark_success(now);
                tracing::info!(
                    source_id = %self.settings.source_id,
                    count = entries.len(),
                    "Fetched rankings"
                );
                let values =
                    BTreeMap::from([(RANKINGS_VALUE_KEY.to_string(), encode_rankings(&entries))]);
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
                    "Rankings fetch failed"
                );
                None
            }
        }
    }
}

#[async_trait]
impl Collector for RankingsCollector {
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

/// Extracts the top `top_n` entries from a rankings response.
///
/// Accepts either a bare array or an object with a `rankings` array. `team`
/// is read from `name` or `team` (string, or object with a `name`), `points`
/// may be a number or a numeric string.
///
/// # Examples
///
/// ```
/// use pulse_collector::rankings::parse_rankings;
/// use serde_json::json;
///
/// let body = json!({"rankings": [
///     {"name": "Real Madrid", "points": 136},
///     {"team": "Man City", "points": "129.5"}
/// ]});
/// let entries = parse_rankings(&body, 6).unwrap();
/// assert_eq!(entries.len(), 2);
/// assert_eq!(entries[1].points, 129.5);
/// ```
pub fn parse_rankings(body: &Value, top_n: usize) -> Result<Vec<RankingEntry>> {
    let list = body
        .as_array()
        .or_else(|| body.get("rankings").and_then(Value::as_array))
        .ok_or_else(|| FetchError::Payload("expected a rankings array".to_string()))?;

    let entries = list
        .iter()
        .take(top_n)
        .enumerate()
        .map(|(idx, item)| parse_entry(item).ok_or_else(|| {
            FetchError::Payload(format!("rankings[{idx}] has no usable team/points"))
        }))
        .collect::<Result<Vec<_>>>()?;

    if entries.is_empty() {
        return Err(FetchError::Payload("rankings list is empty".to_string()));
    }
    Ok(entries)
}

fn parse_entry(item: &Value) -> Option<RankingEntry> {
    let team = item
        .get("name")
        .or_else(|| item.get("team"))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })?;
    let points = match item.get("points")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(RankingEntry { team, points })
}
