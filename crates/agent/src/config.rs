//! Agent configuration
//!
//! Sources, later ones winning:
//! - optional file named by `AGENT_CONFIG_FILE` (format from extension)
//! - environment variables prefixed `AGENT_` (e.g. `AGENT_API_URL`)

use anyhow::{bail, Context, Result};
use fleet_agent_lib::reconcile::ReconcileConfig;
use fleet_agent_lib::runtime::RuntimeEndpoint;
use fleet_agent_lib::supervisor::{AgentSettings, HostOverrides, DEFAULT_DATACENTER};
use fleet_agent_lib::sync::TransportConfig;
use fleet_agent_lib::tasks::TaskConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_ENV: &str = "AGENT_CONFIG_FILE";

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Central API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Bearer token for the central API
    #[serde(default)]
    pub api_token: Option<String>,

    /// `unix://…`, `tcp://…` or `http://…`; platform defaults when unset
    #[serde(default)]
    pub runtime_endpoint: Option<String>,

    #[serde(default)]
    pub host_id: Option<String>,

    #[serde(default = "default_host_name")]
    pub host_name: Option<String>,

    #[serde(default)]
    pub host_ip: Option<String>,

    #[serde(default = "default_datacenter")]
    pub datacenter: String,

    /// Port of the health/metrics endpoint
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Full sync and metrics push period
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    #[serde(default = "default_task_poll_interval")]
    pub task_poll_interval_secs: u64,

    #[serde(default = "default_bulk_sync_delay")]
    pub bulk_sync_delay_ms: u64,

    #[serde(default = "default_event_retry_delay")]
    pub event_retry_delay_secs: u64,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Negative ignore-probe cache TTL; 0 disables it
    #[serde(default)]
    pub ignore_cache_ttl_ms: u64,

    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

fn default_api_url() -> String {
    "http://localhost:8080/api/v1/".to_string()
}

fn default_host_name() -> Option<String> {
    std::env::var("NODE_NAME").ok()
}

fn default_datacenter() -> String {
    DEFAULT_DATACENTER.to_string()
}

fn default_health_port() -> u16 {
    9100
}

fn default_sync_interval() -> u64 {
    30
}

fn default_task_poll_interval() -> u64 {
    5
}

fn default_bulk_sync_delay() -> u64 {
    100
}

fn default_event_retry_delay() -> u64 {
    5
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_conflict_retries() -> u32 {
    3
}

impl AgentConfig {
    /// Load from the optional config file and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        Self::load_from(file.as_deref(), "AGENT")
    }

    pub fn load_from(file: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(config::Environment::with_prefix(env_prefix).try_parsing(true))
            .build()
            .context("Failed to read agent configuration")?
            .try_deserialize()
            .context("Invalid agent configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            bail!("api_url must be an http(s) URL, got {:?}", self.api_url);
        }
        for (key, value) in [
            ("sync_interval_secs", self.sync_interval_secs),
            ("task_poll_interval_secs", self.task_poll_interval_secs),
            ("event_retry_delay_secs", self.event_retry_delay_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", key);
            }
        }
        self.runtime_endpoint()?;
        Ok(())
    }

    pub fn runtime_endpoint(&self) -> Result<RuntimeEndpoint> {
        let raw = self.runtime_endpoint.as_deref().unwrap_or_default();
        raw.parse::<RuntimeEndpoint>()
            .with_context(|| format!("Invalid runtime_endpoint {:?}", raw))
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            base_url: self.api_url.clone(),
            token: self.api_token.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ignore_cache_ttl: Duration::from_millis(self.ignore_cache_ttl_ms),
            conflict_retries: self.conflict_retries,
            ..TransportConfig::default()
        }
    }

    pub fn agent_settings(&self, runtime_label: String) -> AgentSettings {
        let sync_interval = Duration::from_secs(self.sync_interval_secs);
        AgentSettings {
            host: HostOverrides {
                id: self.host_id.clone(),
                name: self.host_name.clone(),
                ip_address: self.host_ip.clone(),
                datacenter: Some(self.datacenter.clone()),
            },
            reconcile: ReconcileConfig {
                sync_interval,
                bulk_delay: Duration::from_millis(self.bulk_sync_delay_ms),
                event_retry_delay: Duration::from_secs(self.event_retry_delay_secs),
            },
            tasks: TaskConfig {
                poll_interval: Duration::from_secs(self.task_poll_interval_secs),
                stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            },
            metrics_interval: sync_interval,
            runtime_label,
        }
    }
}
