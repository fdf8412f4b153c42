//! Agent supervisor
//!
//! Startup order:
//! 1. authentication check against the central API (fatal)
//! 2. runtime ping (fatal)
//! 3. host identity from runtime system info plus overrides
//! 4. host registration (failure degrades, never fatal)
//!
//! Then the event loop, periodic full sync, metrics reporter and task
//! executor run concurrently under one cancellation token until it fires.
//! The first periodic pass is the startup full sync.

use crate::health::{components, HealthRegistry};
use crate::metrics::{HostSampler, MetricsReporter};
use crate::models::{HostRecord, HostStatus};
use crate::observability::StructuredLogger;
use crate::reconcile::{ReconcileConfig, ReconciliationEngine};
use crate::runtime::{ContainerRuntime, SystemInfo};
use crate::sync::SyncTransport;
use crate::tasks::{TaskConfig, TaskExecutor};
use anyhow::{Context, Result};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identity fields that override what the runtime reports
#[derive(Debug, Clone, Default)]
pub struct HostOverrides {
    pub id: Option<String>,
    pub name: Option<String>,
    pub ip_address: Option<String>,
    pub datacenter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub host: HostOverrides,
    pub reconcile: ReconcileConfig,
    pub tasks: TaskConfig,
    /// Metrics push period; the sync interval unless set otherwise
    pub metrics_interval: Duration,
    /// Label for the runtime endpoint in the startup event
    pub runtime_label: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        let reconcile = ReconcileConfig::default();
        Self {
            host: HostOverrides::default(),
            metrics_interval: reconcile.sync_interval,
            reconcile,
            tasks: TaskConfig::default(),
            runtime_label: "local".to_string(),
        }
    }
}

pub const DEFAULT_DATACENTER: &str = "default";

pub struct Agent {
    runtime: Arc<dyn ContainerRuntime>,
    transport: Arc<dyn SyncTransport>,
    settings: AgentSettings,
    health: HealthRegistry,
}

impl Agent {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        transport: Arc<dyn SyncTransport>,
        settings: AgentSettings,
        health: HealthRegistry,
    ) -> Self {
        Self {
            runtime,
            transport,
            settings,
            health,
        }
    }

    /// Run until `cancel` fires. Returns an error only for fatal startup
    /// failures.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        self.health.register_all().await;

        self.transport
            .check_auth()
            .await
            .context("Central API authentication check failed")?;

        if let Err(e) = self.runtime.ping().await {
            self.health
                .set_unhealthy(components::RUNTIME, e.to_string())
                .await;
            return Err(e).context("Container runtime is not reachable");
        }

        let info = self
            .runtime
            .system_info()
            .await
            .context("Failed to read runtime system info")?;
        let host = build_host_record(&info, &self.settings.host, detect_ip().await);

        let logger = StructuredLogger::new(host.id.clone());
        logger.log_startup(env!("CARGO_PKG_VERSION"), &self.settings.runtime_label);

        match self.transport.register_host(&host).await {
            Ok(()) => logger.log_host_registered(&host.name, &host.ip_address, true),
            Err(e) => {
                warn!(host_id = %host.id, error = %e, "Host registration failed");
                logger.log_host_registered(&host.name, &host.ip_address, false);
                self.health
                    .set_degraded(components::CENTRAL_API, format!("host unregistered: {}", e))
                    .await;
            }
        }

        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&self.runtime),
            Arc::clone(&self.transport),
            host.id.clone(),
            self.settings.reconcile.clone(),
            self.health.clone(),
        ));

        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&self.runtime),
            Arc::clone(&self.transport),
            Arc::clone(&engine),
            self.settings.tasks.clone(),
            self.health.clone(),
        ));
        let reporter = MetricsReporter::new(
            HostSampler::new(),
            Arc::clone(&self.transport),
            host.id.clone(),
            self.settings.metrics_interval,
            self.health.clone(),
        );

        let events = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.child_token();
            tokio::spawn(async move { engine.run_event_loop(cancel).await })
        };
        let periodic = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.child_token();
            tokio::spawn(async move { engine.run_periodic(cancel).await })
        };
        let tasks = {
            let executor = Arc::clone(&executor);
            let cancel = cancel.child_token();
            tokio::spawn(async move { executor.run(cancel).await })
        };
        let metrics = tokio::spawn(reporter.run(cancel.child_token()));

        self.health.set_ready(true).await;
        info!(host_id = %host.id, "Agent running");

        cancel.cancelled().await;
        self.health.set_ready(false).await;

        let (events, periodic, tasks, metrics) = tokio::join!(events, periodic, tasks, metrics);
        for (name, joined) in [
            ("event_loop", events),
            ("periodic_sync", periodic),
            ("task_executor", tasks),
            ("metrics_reporter", metrics),
        ] {
            if let Err(e) = joined {
                warn!(task = name, error = %e, "Loop terminated abnormally");
            }
        }

        logger.log_shutdown("cancelled");
        Ok(())
    }
}

/// Assemble this host's identity; overrides win over runtime facts
pub fn build_host_record(
    info: &SystemInfo,
    overrides: &HostOverrides,
    detected_ip: Option<IpAddr>,
) -> HostRecord {
    fn non_empty(value: &Option<String>) -> Option<String> {
        value.clone().filter(|v| !v.trim().is_empty())
    }

    let name = non_empty(&overrides.name)
        .or_else(|| Some(info.name.clone()).filter(|n| !n.is_empty()))
        .unwrap_or_else(|| "unknown".to_string());
    let id = non_empty(&overrides.id)
        .or_else(|| Some(info.id.clone()).filter(|i| !i.is_empty()))
        .unwrap_or_else(|| name.clone());

    HostRecord {
        id,
        name,
        ip_address: non_empty(&overrides.ip_address)
            .or_else(|| detected_ip.map(|ip| ip.to_string()))
            .unwrap_or_else(|| "127.0.0.1".to_string()),
        cpu_cores: info.cpu_cores,
        memory_bytes: info.memory_bytes,
        status: HostStatus::Active,
        datacenter: non_empty(&overrides.datacenter)
            .unwrap_or_else(|| DEFAULT_DATACENTER.to_string()),
    }
}

/// Outbound interface address. Connecting a UDP socket sends nothing; it
/// only makes the kernel pick a route.
pub async fn detect_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    if let Err(e) = socket.connect("8.8.8.8:80").await {
        debug!(error = %e, "No outbound route for IP detection");
        return None;
    }
    socket
        .local_addr()
        .ok()
        .map(|addr| addr.ip())
        .filter(|ip| !ip.is_unspecified())
}
