use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use pulse_common::types::{BatchPayload, CommandResultRequest, CommandStatus, DeviceCommand, MetricSample};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// The agent's view of the server. Kept behind a trait so the collection
/// loop can run against an in-memory implementation.
#[async_trait]
pub trait ServerLink: Send + Sync {
    /// Uploads one batch; returns how many samples the server stored.
    async fn send_batch(&self, samples: &[MetricSample]) -> Result<usize>;

    /// Commands still pending for `source_id`, oldest first.
    async fn pending_commands(&self, source_id: &str) -> Result<Vec<DeviceCommand>>;

    async fn report_result(
        &self,
        source_id: &str,
        command_id: &str,
        status: CommandStatus,
        response: Option<String>,
    ) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    err_code: i32,
    #[serde(default)]
    err_msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct StoredCount {
    stored: usize,
}

/// [`ServerLink`] over the server's JSON HTTP API.
pub struct HttpServerLink {
    base_url: String,
    client: reqwest::Client,
}

impl HttpServerLink {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<Option<T>> {
        let status = resp.status();
        let envelope: Envelope<T> = resp
            .json()
            .await
            .with_context(|| format!("{what}: invalid response body (HTTP {status})"))?;
        if envelope.err_code != 0 {
            return Err(anyhow!(
                "{what}: server returned {} ({}): {}",
                status,
                envelope.err_code,
                envelope.err_msg
            ));
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl ServerLink for HttpServerLink {
    async fn send_batch(&self, samples: &[MetricSample]) -> Result<usize> {
        let body = BatchPayload::from_samples(samples);
        let resp = self
            .client
            .post(self.url("/metrics/snapshot"))
            .json(&body)
            .send()
            .await
            .context("send batch")?;
        let data: Option<StoredCount> = Self::decode(resp, "send batch").await?;
        Ok(data.map(|d| d.stored).unwrap_or(0))
    }

    async fn pending_commands(&self, source_id: &str) -> Result<Vec<DeviceCommand>> {
        let resp = self
            .client
            .get(self.url(&format!("/device/commands/{source_id}/pending")))
            .send()
            .await
            .context("poll commands")?;
        let data: Option<Vec<DeviceCommand>> = Self::decode(resp, "poll commands").await?;
        Ok(data.unwrap_or_default())
    }

    async fn report_result(
        &self,
        source_id: &str,
        command_id: &str,
        status: CommandStatus,
        response: Option<String>,
    ) -> Result<()> {
        let body = CommandResultRequest { status, response };
        let resp = self
            .client
            .post(self.url(&format!(
                "/device/commands/{source_id}/{command_id}/result"
            )))
            .json(&body)
            .send()
            .await
            .context("report command result")?;
        let _: Option<serde_json::Value> = Self::decode(resp, "report command result").await?;
        Ok(())
    }
}
