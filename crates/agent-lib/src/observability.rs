//! Observability for the fleet agent
//!
//! Provides:
//! - Prometheus series for reconciliation, tasks and metrics pushes
//! - Structured JSON lifecycle events with a stable `event` field

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for full sync duration (in seconds); a full sync spaces calls
/// 100ms apart so durations grow with container count
const FULL_SYNC_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    syncs: IntCounter,
    sync_errors: IntCounter,
    syncs_skipped_ignored: IntCounter,
    full_sync_duration_seconds: Histogram,
    containers_observed: IntGauge,
    ignore_entries_purged: IntCounter,
    event_stream_reconnects: IntCounter,
    tasks_executed: IntCounter,
    task_failures: IntCounter,
    metrics_push_errors: IntCounter,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            syncs: register_int_counter!(
                "fleet_agent_syncs_total",
                "Container syncs pushed to the central API"
            )
            .expect("Failed to register syncs_total"),

            sync_errors: register_int_counter!(
                "fleet_agent_sync_errors_total",
                "Container syncs that failed and will be retried"
            )
            .expect("Failed to register sync_errors_total"),

            syncs_skipped_ignored: register_int_counter!(
                "fleet_agent_syncs_skipped_ignored_total",
                "Container syncs suppressed by the ignore list"
            )
            .expect("Failed to register syncs_skipped_ignored_total"),

            full_sync_duration_seconds: register_histogram!(
                "fleet_agent_full_sync_duration_seconds",
                "Wall time of a full discovery and sync pass",
                FULL_SYNC_BUCKETS.to_vec()
            )
            .expect("Failed to register full_sync_duration_seconds"),

            containers_observed: register_int_gauge!(
                "fleet_agent_containers_observed",
                "Containers listed by the runtime on the last full sync"
            )
            .expect("Failed to register containers_observed"),

            ignore_entries_purged: register_int_counter!(
                "fleet_agent_ignore_entries_purged_total",
                "Stale ignore-list entries removed by full sync"
            )
            .expect("Failed to register ignore_entries_purged_total"),

            event_stream_reconnects: register_int_counter!(
                "fleet_agent_event_stream_reconnects_total",
                "Runtime event stream resubscriptions"
            )
            .expect("Failed to register event_stream_reconnects_total"),

            tasks_executed: register_int_counter!(
                "fleet_agent_tasks_executed_total",
                "Tasks executed against the local runtime"
            )
            .expect("Failed to register tasks_executed_total"),

            task_failures: register_int_counter!(
                "fleet_agent_task_failures_total",
                "Tasks whose result reported failure"
            )
            .expect("Failed to register task_failures_total"),

            metrics_push_errors: register_int_counter!(
                "fleet_agent_metrics_push_errors_total",
                "Host metrics pushes that failed"
            )
            .expect("Failed to register metrics_push_errors_total"),
        }
    }
}

/// Handle to the process-wide Prometheus series
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    inner: &'static AgentMetricsInner,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(AgentMetricsInner::new),
        }
    }

    pub fn inc_syncs(&self) {
        self.inner.syncs.inc();
    }

    pub fn inc_sync_errors(&self) {
        self.inner.sync_errors.inc();
    }

    pub fn inc_skipped_ignored(&self) {
        self.inner.syncs_skipped_ignored.inc();
    }

    pub fn observe_full_sync(&self, duration_secs: f64, containers: usize) {
        self.inner.full_sync_duration_seconds.observe(duration_secs);
        self.inner.containers_observed.set(containers as i64);
    }

    pub fn add_ignore_purged(&self, count: u64) {
        self.inner.ignore_entries_purged.inc_by(count);
    }

    pub fn inc_event_reconnects(&self) {
        self.inner.event_stream_reconnects.inc();
    }

    /// Count one executed task and, when it failed, one failure
    pub fn record_task(&self, success: bool) {
        self.inner.tasks_executed.inc();
        if !success {
            self.inner.task_failures.inc();
        }
    }

    pub fn inc_metrics_push_errors(&self) {
        self.inner.metrics_push_errors.inc();
    }
}

/// Emits well-known agent lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    host_id: String,
}

impl StructuredLogger {
    pub fn new(host_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
        }
    }

    pub fn log_startup(&self, version: &str, runtime_endpoint: &str) {
        info!(
            event = "agent_started",
            host_id = %self.host_id,
            agent_version = %version,
            runtime_endpoint = %runtime_endpoint,
            "Fleet agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            host_id = %self.host_id,
            reason = %reason,
            "Fleet agent shutting down"
        );
    }

    pub fn log_host_registered(&self, name: &str, ip_address: &str, registered: bool) {
        if registered {
            info!(
                event = "host_registered",
                host_id = %self.host_id,
                host_name = %name,
                ip_address = %ip_address,
                "Host registered with central API"
            );
        } else {
            warn!(
                event = "host_registered",
                host_id = %self.host_id,
                host_name = %name,
                registered = false,
                "Host registration failed, continuing unregistered"
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_full_sync(
        &self,
        listed: usize,
        synced: usize,
        ignored: usize,
        vanished: usize,
        failed: usize,
        purged: usize,
        duration_ms: u128,
    ) {
        info!(
            event = "full_sync_complete",
            host_id = %self.host_id,
            listed = listed,
            synced = synced,
            ignored = ignored,
            vanished = vanished,
            failed = failed,
            purged = purged,
            duration_ms = duration_ms as u64,
            "Full sync complete"
        );
    }

    pub fn log_task_completed(
        &self,
        task_id: &str,
        task_type: &str,
        success: bool,
        container_id: Option<&str>,
        message: &str,
    ) {
        if success {
            info!(
                event = "task_completed",
                host_id = %self.host_id,
                task_id = %task_id,
                task_type = %task_type,
                container_id = ?container_id,
                success = true,
                message = %message,
                "Task completed"
            );
        } else {
            warn!(
                event = "task_completed",
                host_id = %self.host_id,
                task_id = %task_id,
                task_type = %task_type,
                container_id = ?container_id,
                success = false,
                message = %message,
                "Task failed"
            );
        }
    }

    pub fn log_event_stream_reconnect(&self, reason: &str, delay_secs: u64) {
        warn!(
            event = "event_stream_reconnect",
            host_id = %self.host_id,
            reason = %reason,
            delay_secs = delay_secs,
            "Runtime event stream interrupted, resubscribing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_metrics_handles_share_registry() {
        let a = AgentMetrics::new();
        let b = AgentMetrics::new();

        a.inc_syncs();
        a.record_task(false);
        b.observe_full_sync(0.3, 4);
        b.add_ignore_purged(2);

        assert!(std::ptr::eq(a.inner, b.inner));
        assert!(a.inner.task_failures.get() >= 1);
        assert!(b.inner.ignore_entries_purged.get() >= 2);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("host-1");
        assert_eq!(logger.host_id, "host-1");
    }
}
