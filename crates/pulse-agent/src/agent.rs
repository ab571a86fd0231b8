use crate::commands::{AgentStatus, CommandRegistry};
use crate::link::ServerLink;
use crate::queue::StagingQueue;
use pulse_collector::Collector;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};

/// Outcome of one collection cycle, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub collected: usize,
    pub sent: usize,
    pub commands: usize,
}

/// Drives collectors, uploads and command polling on a fixed interval.
///
/// Delivery is best-effort: a failed upload is logged and the drained batch
/// is dropped rather than requeued.
pub struct CollectionAgent {
    collectors: Vec<Box<dyn Collector>>,
    queue: Arc<StagingQueue>,
    link: Box<dyn ServerLink>,
    registry: CommandRegistry,
    interval: Duration,
    started: Instant,
    cycles: u64,
}

impl CollectionAgent {
    pub fn new(
        collectors: Vec<Box<dyn Collector>>,
        link: Box<dyn ServerLink>,
        interval: Duration,
    ) -> Self {
        Self {
            collectors,
            queue: Arc::new(StagingQueue::new()),
            link,
            registry: CommandRegistry::with_builtins(),
            interval,
            started: Instant::now(),
            cycles: 0,
        }
    }

    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn queue(&self) -> Arc<StagingQueue> {
        Arc::clone(&self.queue)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Distinct source identities, in registration order.
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for collector in &self.collectors {
            if !ids.iter().any(|id| id == collector.source_id()) {
                ids.push(collector.source_id().to_string());
            }
        }
        ids
    }

    fn status(&self) -> AgentStatus {
        AgentStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
            collectors: self
                .collectors
                .iter()
                .map(|c| format!("{}/{}", c.source_id(), c.stream_kind()))
                .collect(),
            cycles: self.cycles,
        }
    }

    /// One pass: sample, stage, drain, upload, then execute pending commands.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        for collector in &mut self.collectors {
            if let Some(sample) = collector.sample().await {
                self.queue.add(sample);
                report.collected += 1;
            } else {
                tracing::debug!(
                    source_id = %collector.source_id(),
                    stream_kind = %collector.stream_kind(),
                    "No sample this cycle"
                );
            }
        }

        let batch = self.queue.drain_all();
        if !batch.is_empty() {
            match self.link.send_batch(&batch).await {
                Ok(stored) => {
                    report.sent = batch.len();
                    tracing::info!(count = batch.len(), stored, "Metrics reported");
                }
                Err(e) => {
                    tracing::warn!(count = batch.len(), error = %e, "Failed to send metrics, dropping batch");
                }
            }
        }

        report.commands = self.process_commands().await;
        self.cycles += 1;
        report
    }

    async fn process_commands(&self) -> usize {
        let mut handled = 0;
        for source_id in self.source_ids() {
            let pending = match self.link.pending_commands(&source_id).await {
                Ok(pending) => pending,
                Err(e) => {
                    tracing::warn!(source_id = %source_id, error = %e, "Failed to poll commands");
                    continue;
                }
            };

            for command in pending {
                let (status, response) = self.registry.dispatch(&command, &self.status());
                tracing::info!(
                    source_id = %source_id,
                    command_id = %command.id,
                    command = %command.command,
                    status = %status,
                    "Executed command"
                );
                match self
                    .link
                    .report_result(&source_id, &command.id, status, Some(response))
                    .await
                {
                    Ok(()) => handled += 1,
                    Err(e) => tracing::warn!(
                        command_id = %command.id,
                        error = %e,
                        "Failed to report command result"
                    ),
                }
            }
        }
        handled
    }

    /// Runs cycles until `shutdown` resolves. The first cycle starts
    /// immediately.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            collectors = self.collectors.len(),
            "Starting collection loop"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let report = self.run_cycle().await;
                    tracing::debug!(
                        collected = report.collected,
                        sent = report.sent,
                        commands = report.commands,
                        "Cycle finished"
                    );
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutting down gracefully");
                    break;
                }
            }
        }
    }

    /// Runs until Ctrl-C.
    pub async fn run(self) {
        self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}
