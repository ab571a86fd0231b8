use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Value key under which the rankings list travels inside a sample.
pub const RANKINGS_VALUE_KEY: &str = "rankings";

/// A single named value inside a sample: either numeric or text.
///
/// # Examples
///
/// ```
/// use pulse_common::types::MetricValue;
/// use serde_json::json;
///
/// assert_eq!(MetricValue::from_json(&json!(42)), Some(MetricValue::Number(42.0)));
/// assert_eq!(MetricValue::from_json(&json!(true)), Some(MetricValue::Number(1.0)));
/// assert_eq!(MetricValue::from_json(&json!("up")), Some(MetricValue::Text("up".into())));
/// assert_eq!(MetricValue::from_json(&json!(null)), None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    /// Converts an arbitrary JSON value. Arrays and objects are kept as their
    /// compact JSON text; `null` has no representation.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(MetricValue::Number(if *b { 1.0 } else { 0.0 })),
            Value::Number(n) => n.as_f64().map(MetricValue::Number),
            Value::String(s) => Some(MetricValue::Text(s.clone())),
            other => Some(MetricValue::Text(other.to_string())),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Number(_) => None,
            MetricValue::Text(s) => Some(s),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, MetricValue::Number(_))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Number(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Number(v as f64)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

/// One timestamped observation of a stream.
///
/// Samples are immutable: fields are only reachable through accessors.
///
/// # Examples
///
/// ```
/// use pulse_common::types::{MetricSample, MetricValue};
/// use std::collections::BTreeMap;
///
/// let values = BTreeMap::from([("ram_usage".to_string(), MetricValue::Number(42.0))]);
/// let sample = MetricSample::new("device_1", "system_metrics", values);
/// assert_eq!(sample.source_id(), "device_1");
/// assert_eq!(sample.values()["ram_usage"].as_f64(), Some(42.0));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    source_id: String,
    stream_kind: String,
    values: BTreeMap<String, MetricValue>,
    captured_at: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(
        source_id: impl Into<String>,
        stream_kind: impl Into<String>,
        values: BTreeMap<String, MetricValue>,
    ) -> Self {
        Self::with_captured_at(source_id, stream_kind, values, Utc::now())
    }

    pub fn with_captured_at(
        source_id: impl Into<String>,
        stream_kind: impl Into<String>,
        values: BTreeMap<String, MetricValue>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            stream_kind: stream_kind.into(),
            values,
            captured_at,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn stream_kind(&self) -> &str {
        &self.stream_kind
    }

    pub fn values(&self) -> &BTreeMap<String, MetricValue> {
        &self.values
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Wire form used by the agent when uploading.
    pub fn to_payload(&self) -> SnapshotPayload {
        let values = self
            .values
            .iter()
            .map(|(k, v)| {
                let json = match v {
                    MetricValue::Number(n) => serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null),
                    MetricValue::Text(s) => Value::String(s.clone()),
                };
                (k.clone(), json)
            })
            .collect();
        SnapshotPayload {
            source_id: Some(self.source_id.clone()),
            stream_kind: Some(self.stream_kind.clone()),
            values: Some(values),
            timestamp: Some(self.captured_at),
        }
    }
}

/// A single snapshot as posted to `POST /metrics/snapshot`.
///
/// All fields are optional at the deserialization level so that a missing
/// field can be reported as a validation failure instead of a parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    #[serde(default, alias = "source_id", alias = "device_id", skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, alias = "stream_kind", alias = "metric_type", skip_serializing_if = "Option::is_none")]
    pub stream_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub values: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SnapshotPayload {
    /// Validates required fields and converts to a sample. `fallback_time` is
    /// used when the payload carries no timestamp.
    pub fn into_sample(self, fallback_time: DateTime<Utc>) -> Result<MetricSample, String> {
        let source_id = self
            .source_id
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| "sourceId is required".to_string())?;
        let stream_kind = self
            .stream_kind
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| "streamKind is required".to_string())?;
        let raw = self
            .values
            .ok_or_else(|| "values is required".to_string())?;

        let values: BTreeMap<String, MetricValue> = raw
            .iter()
            .filter_map(|(k, v)| MetricValue::from_json(v).map(|mv| (k.clone(), mv)))
            .collect();
        if values.is_empty() {
            return Err("values must contain at least one non-null entry".to_string());
        }

        Ok(MetricSample::with_captured_at(
            source_id,
            stream_kind,
            values,
            self.timestamp.unwrap_or(fallback_time),
        ))
    }
}

/// Batch envelope sent by the agent: one network call per collection cycle.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub metrics: Vec<SnapshotPayload>,
}

impl BatchPayload {
    pub fn from_samples(samples: &[MetricSample]) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            metrics: samples.iter().map(MetricSample::to_payload).collect(),
        }
    }
}

/// Body of `POST /metrics/snapshot`: a batch envelope or a bare snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum IngestRequest {
    Batch(BatchPayload),
    Single(SnapshotPayload),
}

impl IngestRequest {
    /// Converts the body into samples, failing on the first invalid snapshot.
    pub fn into_samples(self, now: DateTime<Utc>) -> Result<Vec<MetricSample>, String> {
        match self {
            IngestRequest::Single(snapshot) => Ok(vec![snapshot.into_sample(now)?]),
            IngestRequest::Batch(batch) => {
                if batch.metrics.is_empty() {
                    return Err("metrics must not be empty".to_string());
                }
                let fallback = batch.timestamp.unwrap_or(now);
                batch
                    .metrics
                    .into_iter()
                    .enumerate()
                    .map(|(idx, snapshot)| {
                        snapshot
                            .into_sample(fallback)
                            .map_err(|e| format!("metrics[{idx}]: {e}"))
                    })
                    .collect()
            }
        }
    }
}

/// One row of a rankings snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RankingEntry {
    pub team: String,
    pub points: f64,
}

/// Packs a rankings list into the single text value it travels as.
pub fn encode_rankings(entries: &[RankingEntry]) -> MetricValue {
    MetricValue::Text(serde_json::to_string(entries).unwrap_or_else(|_| "[]".to_string()))
}

/// Reverses [`encode_rankings`].
///
/// # Examples
///
/// ```
/// use pulse_common::types::{decode_rankings, encode_rankings, RankingEntry};
///
/// let entries = vec![RankingEntry { team: "Real Madrid".into(), points: 136.0 }];
/// let decoded = decode_rankings(&encode_rankings(&entries)).unwrap();
/// assert_eq!(decoded, entries);
/// ```
pub fn decode_rankings(value: &MetricValue) -> Result<Vec<RankingEntry>, String> {
    match value {
        MetricValue::Text(raw) => {
            serde_json::from_str(raw).map_err(|e| format!("invalid rankings payload: {e}"))
        }
        MetricValue::Number(_) => Err("rankings must be a list".to_string()),
    }
}

/// A row of the current rankings snapshot as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredRanking {
    pub source_id: String,
    pub team: String,
    pub points: f64,
    pub year: i32,
    pub updated_at: DateTime<Utc>,
}

/// A persisted row of a stream table in key/value form. NULL cells are
/// simply absent from `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRow {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub values: BTreeMap<String, MetricValue>,
}

/// Lifecycle state of a device command.
///
/// # Examples
///
/// ```
/// use pulse_common::types::CommandStatus;
///
/// let status: CommandStatus = "completed".parse().unwrap();
/// assert!(status.is_terminal());
/// assert!(!CommandStatus::Pending.is_terminal());
/// assert_eq!(CommandStatus::Failed.to_string(), "failed");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CommandStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(CommandStatus::Pending),
            "completed" => Ok(CommandStatus::Completed),
            "failed" => Ok(CommandStatus::Failed),
            _ => Err(format!("unknown command status: {s}")),
        }
    }
}

/// A command addressed to one source, executed by the agent that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceCommand {
    pub id: String,
    pub source_id: String,
    pub command: String,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub response: Option<String>,
}

/// Body of `POST /device/command/{source_id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateCommandRequest {
    #[serde(default)]
    pub command: Option<String>,
}

/// Body of `POST /device/commands/{source_id}/{command_id}/result`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommandResultRequest {
    pub status: CommandStatus,
    #[serde(default)]
    pub response: Option<String>,
}
