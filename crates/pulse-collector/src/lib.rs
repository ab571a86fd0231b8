//! Metric collectors for the pulse agent.
//!
//! Each [`Collector`] produces at most one [`MetricSample`] per invocation for
//! a single `(source_id, stream_kind)` stream. Networked collectors compose a
//! [`rate_limit::RateLimiter`] and decline to produce (return `None`) while
//! their source is not due or when the upstream call fails; they never block
//! waiting for the interval to pass.

pub mod error;
pub mod prices;
pub mod rankings;
pub mod rate_limit;
pub mod system;

use async_trait::async_trait;
use pulse_common::types::MetricSample;
use std::time::Duration;

/// Timeout applied to every outbound third-party call.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A metric source registered in the agent's collection loop.
///
/// The trait requires `Send + Sync` so collectors can live inside the agent's
/// background task.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Identity of the source this collector samples (e.g. `"device_1"`).
    fn source_id(&self) -> &str;

    /// Kind of stream produced (e.g. `"system_metrics"`).
    fn stream_kind(&self) -> &str;

    /// Produces a sample, or `None` when the source is not due yet or the
    /// upstream call failed. Failures are logged, never propagated.
    async fn sample(&mut self) -> Option<MetricSample>;
}

/// Builds the HTTP client shared by networked collectors.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, error::FetchError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("pulse-agent/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}
