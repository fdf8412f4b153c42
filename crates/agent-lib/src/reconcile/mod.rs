//! Reconciliation engine
//!
//! Keeps the central API's view of this host's containers in line with
//! what the runtime reports. Three entry points share one sync path:
//! - full sync: list everything, sync each container with a fixed
//!   inter-call delay, then purge stale ignore-list entries
//! - event-driven sync: a long-lived subscription to lifecycle events
//! - single sync: used by both of the above and by the task executor
//!
//! Per-container state is never kept locally. Every sync re-inspects the
//! runtime, so concurrent syncs of the same identity converge on the last
//! successful write.

mod events;

pub use events::{classify, EventAction};

use crate::error::{ReconcileError, SyncError};
use crate::health::{components, HealthRegistry};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::runtime::{ContainerRuntime, LifecycleEvent};
use crate::sync::{SyncOutcome, SyncTransport};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Period of the full sync loop (default: 30 seconds)
    pub sync_interval: Duration,
    /// Delay between consecutive syncs in a full sync (default: 100ms)
    pub bulk_delay: Duration,
    /// Wait before resubscribing to a failed event stream (default: 5 seconds)
    pub event_retry_delay: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            bulk_delay: Duration::from_millis(100),
            event_retry_delay: Duration::from_secs(5),
        }
    }
}

/// What happened to one container in a single sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    Synced(SyncOutcome),
    /// Inspect found nothing; the container went away after it was listed
    Vanished,
}

/// Tally of one full sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FullSyncReport {
    pub listed: usize,
    pub synced: usize,
    pub ignored: usize,
    pub vanished: usize,
    pub failed: usize,
    /// Inter-call delays inserted
    pub delays: usize,
    /// Stale ignore-list entries removed
    pub purged: usize,
}

pub struct ReconciliationEngine {
    runtime: Arc<dyn ContainerRuntime>,
    transport: Arc<dyn SyncTransport>,
    host_id: String,
    config: ReconcileConfig,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl ReconciliationEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        transport: Arc<dyn SyncTransport>,
        host_id: impl Into<String>,
        config: ReconcileConfig,
        health: HealthRegistry,
    ) -> Self {
        let host_id = host_id.into();
        Self {
            runtime,
            transport,
            logger: StructuredLogger::new(host_id.clone()),
            host_id,
            config,
            health,
            metrics: AgentMetrics::new(),
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Inspect one container and push its record.
    ///
    /// A container that no longer exists is `Vanished`, not an error.
    pub async fn sync_one(&self, id: &str) -> Result<SyncResult, ReconcileError> {
        let detail = match self.runtime.inspect(id).await {
            Ok(detail) => detail,
            Err(e) if e.is_not_found() => {
                debug!(container_id = %id, "Container vanished before inspect, nothing to sync");
                return Ok(SyncResult::Vanished);
            }
            Err(e) => return Err(e.into()),
        };

        let record = detail.into_record(&self.host_id);
        match self.transport.sync_container(&record).await {
            Ok(SyncOutcome::Ignored) => {
                self.metrics.inc_skipped_ignored();
                Ok(SyncResult::Synced(SyncOutcome::Ignored))
            }
            Ok(outcome) => {
                self.metrics.inc_syncs();
                debug!(container_id = %id, status = %record.status, ?outcome, "Container synced");
                Ok(SyncResult::Synced(outcome))
            }
            Err(e) => {
                self.metrics.inc_sync_errors();
                Err(e.into())
            }
        }
    }

    /// List every container (stopped included), sync each, then purge
    /// ignore-list entries whose identity the runtime no longer has.
    pub async fn discover_and_sync_all(&self) -> Result<FullSyncReport, ReconcileError> {
        let started = Instant::now();
        let containers = self.runtime.list_containers(true).await?;

        let mut report = FullSyncReport {
            listed: containers.len(),
            ..FullSyncReport::default()
        };

        for (index, container) in containers.iter().enumerate() {
            match self.sync_one(&container.id).await {
                Ok(SyncResult::Synced(SyncOutcome::Ignored)) => report.ignored += 1,
                Ok(SyncResult::Synced(_)) => report.synced += 1,
                Ok(SyncResult::Vanished) => report.vanished += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        container_id = %container.id,
                        container_name = %container.name,
                        error = %e,
                        "Container sync failed, will retry next cycle"
                    );
                }
            }

            if index + 1 < containers.len() {
                tokio::time::sleep(self.config.bulk_delay).await;
                report.delays += 1;
            }
        }

        let present: HashSet<&str> = containers.iter().map(|c| c.id.as_str()).collect();
        report.purged = self.purge_stale_ignores(&present).await;

        let elapsed = started.elapsed();
        self.metrics
            .observe_full_sync(elapsed.as_secs_f64(), report.listed);
        self.metrics.add_ignore_purged(report.purged as u64);
        self.logger.log_full_sync(
            report.listed,
            report.synced,
            report.ignored,
            report.vanished,
            report.failed,
            report.purged,
            elapsed.as_millis(),
        );

        Ok(report)
    }

    /// Remove every ignore-list entry absent from `present`. Failures are
    /// logged; the next full sync retries them.
    ///
    /// Assumes `GET containers/ignored` lists only this host's entries. A
    /// list spanning several hosts would have each agent purge the others'.
    async fn purge_stale_ignores(&self, present: &HashSet<&str>) -> usize {
        let entries = match self.transport.list_ignored().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list ignore list, skipping cleanup");
                return 0;
            }
        };

        let mut purged = 0;
        for entry in entries
            .iter()
            .filter(|e| !present.contains(e.container_id.as_str()))
        {
            match self.transport.remove_ignored(&entry.container_id).await {
                Ok(()) => {
                    purged += 1;
                    debug!(container_id = %entry.container_id, "Purged stale ignore entry");
                }
                Err(e) => warn!(
                    container_id = %entry.container_id,
                    error = %e,
                    "Failed to purge stale ignore entry"
                ),
            }
        }
        purged
    }

    /// The container's existence ended: delete it centrally and clear its
    /// ignore entry. Both calls are attempted; the first error is returned.
    pub async fn handle_gone(&self, id: &str) -> Result<(), SyncError> {
        let deleted = self.transport.delete_container(id).await;
        if let Err(e) = &deleted {
            warn!(container_id = %id, error = %e, "Central delete failed");
        }

        let cleared = self.transport.remove_ignored(id).await;
        if let Err(e) = &cleared {
            warn!(container_id = %id, error = %e, "Failed to clear ignore entry");
        }

        deleted.and(cleared)
    }

    /// Dispatch one lifecycle event through the action table
    pub async fn handle_event(&self, event: &LifecycleEvent) -> Result<(), ReconcileError> {
        let id = event.container_id.as_str();
        match classify(&event.action) {
            EventAction::Resync { clear_ignore } => {
                debug!(container_id = %id, action = %event.action, "Lifecycle event, resyncing");
                if clear_ignore {
                    // Identity reintroduced in the runtime; the old entry is stale
                    if let Err(e) = self.transport.remove_ignored(id).await {
                        warn!(container_id = %id, error = %e, "Failed to clear ignore entry on create");
                    }
                }
                self.sync_one(id).await.map(|_| ())
            }
            EventAction::Gone => {
                debug!(container_id = %id, action = %event.action, "Container gone");
                self.handle_gone(id).await.map_err(Into::into)
            }
            EventAction::Ignore => Ok(()),
        }
    }

    /// Consume the runtime event stream until `cancel` fires, resubscribing
    /// after a fixed delay whenever the stream errors or ends.
    pub async fn run_event_loop(&self, cancel: CancellationToken) {
        info!("Starting runtime event loop");

        loop {
            let mut stream = self.runtime.events();
            self.health.set_healthy(components::EVENT_STREAM).await;

            let reason = loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Shutting down runtime event loop");
                        return;
                    }
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            if let Err(e) = self.handle_event(&event).await {
                                warn!(
                                    container_id = %event.container_id,
                                    action = %event.action,
                                    error = %e,
                                    "Event-driven sync failed"
                                );
                            }
                        }
                        Some(Err(e)) => break e.to_string(),
                        None => break "event stream closed".to_string(),
                    }
                }
            };
            drop(stream);

            self.metrics.inc_event_reconnects();
            self.logger
                .log_event_stream_reconnect(&reason, self.config.event_retry_delay.as_secs());
            self.health
                .set_degraded(components::EVENT_STREAM, reason)
                .await;

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutting down runtime event loop");
                    return;
                }
                _ = tokio::time::sleep(self.config.event_retry_delay) => {}
            }
        }
    }

    /// Run a full sync immediately and then every `sync_interval` until
    /// `cancel` fires. A pass in progress is abandoned on cancellation.
    pub async fn run_periodic(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.sync_interval.as_secs(),
            "Starting periodic full sync"
        );

        let mut ticker = interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let pass = async {
                ticker.tick().await;
                let result = self.discover_and_sync_all().await;
                if let Err(e) = &result {
                    warn!(error = %e, "Full sync failed, will retry next cycle");
                }
                self.health.record(components::FULL_SYNC, &result).await;
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutting down periodic full sync");
                    break;
                }
                _ = pass => {}
            }
        }
    }
}
