//! Host metrics reporting
//!
//! Samples host CPU and memory utilization and pushes it as a partial
//! host update. Runs immediately on start, then once per interval. A
//! failed cycle is logged and retried on the next one.

mod sampler;

pub use sampler::{average_cpu, host_metrics, HostSampler, MemoryUsage};

use crate::health::{components, HealthRegistry};
use crate::observability::AgentMetrics;
use crate::sync::SyncTransport;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct MetricsReporter {
    sampler: HostSampler,
    transport: Arc<dyn SyncTransport>,
    host_id: String,
    interval: Duration,
    health: HealthRegistry,
    metrics: AgentMetrics,
}

impl MetricsReporter {
    pub fn new(
        sampler: HostSampler,
        transport: Arc<dyn SyncTransport>,
        host_id: impl Into<String>,
        interval: Duration,
        health: HealthRegistry,
    ) -> Self {
        Self {
            sampler,
            transport,
            host_id: host_id.into(),
            interval,
            health,
            metrics: AgentMetrics::new(),
        }
    }

    /// Sample and push once
    pub async fn report_once(&mut self) -> Result<()> {
        let sample = self.sampler.sample().await;

        if let Err(e) = self.transport.push_metrics(&self.host_id, &sample).await {
            self.metrics.inc_metrics_push_errors();
            return Err(e.into());
        }

        debug!(
            cpu_percent = sample.cpu_percent,
            memory_bytes = sample.memory_bytes,
            memory_percent = sample.memory_percent,
            "Host metrics pushed"
        );
        Ok(())
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting host metrics reporter"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = self.report_once().await;
                    if let Err(e) = &result {
                        warn!(error = %e, "Host metrics cycle failed, will retry next interval");
                    }
                    self.health.record(components::METRICS_REPORTER, &result).await;
                }
                _ = cancel.cancelled() => {
                    info!("Shutting down host metrics reporter");
                    break;
                }
            }
        }
    }
}
