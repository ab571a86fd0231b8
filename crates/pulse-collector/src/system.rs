use crate::Collector;
use async_trait::async_trait;
use pulse_common::types::{MetricSample, MetricValue};
use std::collections::BTreeMap;
use sysinfo::{ProcessesToUpdate, System};

pub const DEFAULT_SOURCE_ID: &str = "device_1";
pub const DEFAULT_STREAM_KIND: &str = "system_metrics";

/// Local host metrics: RAM usage percent and the agent's own thread count.
///
/// Never rate limited; every call produces a sample.
pub struct SystemCollector {
    source_id: String,
    stream_kind: String,
    system: System,
}

impl SystemCollector {
    pub fn new(source_id: impl Into<String>, stream_kind: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            stream_kind: stream_kind.into(),
            system: System::new(),
        }
    }

    fn ram_usage(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let used = self.system.used_memory();
        if total > 0 {
            (used as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    fn thread_count(&mut self) -> u64 {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                tracing::debug!(error = %e, "Cannot resolve current pid");
                return 0;
            }
        };
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system
            .process(pid)
            .and_then(|process| process.tasks())
            .map(|tasks| tasks.len() as u64)
            .unwrap_or(0)
    }
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_ID, DEFAULT_STREAM_KIND)
    }
}

#[async_trait]
impl Collector for SystemCollector {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn stream_kind(&self) -> &str {
        &self.stream_kind
    }

    async fn sample(&mut self) -> Option<MetricSample> {
        let values = BTreeMap::from([
            ("ram_usage".to_string(), MetricValue::from(self.ram_usage())),
            ("thread_count".to_string(), MetricValue::from(self.thread_count())),
        ]);
        Some(MetricSample::new(&self.source_id, &self.stream_kind, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_ram_and_thread_values_every_call() {
        let mut collector = SystemCollector::default();
        assert_eq!(collector.source_id(), "device_1");
        assert_eq!(collector.stream_kind(), "system_metrics");

        for _ in 0..2 {
            let sample = collector.sample().await.expect("system collector always samples");
            let ram = sample.values()["ram_usage"].as_f64().unwrap();
            assert!((0.0..=100.0).contains(&ram), "ram_usage out of range: {ram}");
            assert!(sample.values()["thread_count"].is_numeric());
        }
    }
}
