//! Container runtime adapter contract
//!
//! The reconciliation engine and the task executor only talk to the
//! runtime through [`ContainerRuntime`]. A Docker-compatible implementation
//! backed by bollard lives in [`docker`]; tests substitute in-memory mocks.
//!
//! Runtime-native state flags are normalized into a [`ContainerStatus`]
//! by [`map_status`], which is total and deterministic.

mod docker;

pub use docker::DockerRuntime;

use crate::error::RuntimeError;
use crate::models::{ContainerRecord, ContainerStatus, PortMapping, PullPolicy, RestartPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Stream of lifecycle events; it ends or yields an error on transport failure
pub type EventStream<'a> = BoxStream<'a, Result<LifecycleEvent, RuntimeError>>;

/// Lightweight listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
}

/// Native state flags reported by the runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateFlags {
    pub running: bool,
    pub paused: bool,
    pub restarting: bool,
    pub dead: bool,
}

/// Map runtime state flags to the canonical status.
///
/// Precedence is running, paused, restarting, dead; anything else
/// (created, exited, removing) is `stopped`.
pub fn map_status(flags: StateFlags) -> ContainerStatus {
    if flags.running {
        ContainerStatus::Running
    } else if flags.paused {
        ContainerStatus::Paused
    } else if flags.restarting {
        ContainerStatus::Restarting
    } else if flags.dead {
        ContainerStatus::Exited
    } else {
        ContainerStatus::Stopped
    }
}

/// Result of inspecting a single container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerDetail {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: StateFlags,
    pub ports: Vec<PortMapping>,
    pub env: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ContainerDetail {
    pub fn status(&self) -> ContainerStatus {
        map_status(self.state)
    }

    /// Build the canonical record owned by `host_id`
    pub fn into_record(self, host_id: &str) -> ContainerRecord {
        let status = self.status();
        ContainerRecord {
            id: self.id,
            name: self.name,
            image: self.image,
            status,
            host_id: host_id.to_string(),
            ports: self.ports,
            env: self.env,
            created_at: self.created_at,
        }
    }
}

/// A container-scoped lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub action: String,
    pub container_id: String,
    pub name: Option<String>,
    pub time: Option<i64>,
}

/// Host facts reported by the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemInfo {
    pub id: String,
    pub name: String,
    pub cpu_cores: u32,
    pub memory_bytes: u64,
}

/// Port publication in runtime terms, defaults already applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBindingRequest {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub host_ip: String,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Restart policy primitive with an optional bounded retry count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartRule {
    pub policy: RestartPolicy,
    pub max_retries: Option<i64>,
}

/// Fully translated container creation request
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub name: Option<String>,
    pub image: String,
    pub env: Vec<String>,
    pub cmd: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub ports: Vec<PortBindingRequest>,
    pub mounts: Vec<MountRequest>,
    pub restart: RestartRule,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub force: bool,
    pub remove_volumes: bool,
}

/// Contract every container runtime implementation satisfies
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime control API answers
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn system_info(&self) -> Result<SystemInfo, RuntimeError>;

    async fn list_containers(&self, include_stopped: bool)
        -> Result<Vec<ContainerRef>, RuntimeError>;

    /// Inspect one container; a vanished container is `RuntimeError::NotFound`
    async fn inspect(&self, id: &str) -> Result<ContainerDetail, RuntimeError>;

    /// Subscribe to container-scoped lifecycle events
    fn events(&self) -> EventStream<'_>;

    /// Fails when the image is not present locally
    async fn inspect_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Pull an image, draining the whole progress stream before returning
    async fn pull(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a container and return its runtime-assigned identity
    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn remove(&self, id: &str, options: RemoveOptions) -> Result<(), RuntimeError>;

    /// Apply `policy` and pull when required. Returns whether a pull happened.
    async fn pull_image(&self, image: &str, policy: PullPolicy) -> Result<bool, RuntimeError> {
        match policy {
            PullPolicy::Never => Ok(false),
            PullPolicy::IfNotPresent => {
                if self.inspect_image(image).await.is_ok() {
                    debug!(image = %image, "Image present locally, skipping pull");
                    return Ok(false);
                }
                info!(image = %image, "Image not present locally, pulling");
                self.pull(image).await?;
                Ok(true)
            }
            PullPolicy::Always => {
                info!(image = %image, "Pulling image");
                self.pull(image).await?;
                Ok(true)
            }
        }
    }
}

/// Where the runtime control API is reachable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEndpoint {
    /// Platform defaults (DOCKER_HOST or the local socket)
    Local,
    Unix(PathBuf),
    Tcp(String),
}

impl RuntimeEndpoint {
    pub fn label(&self) -> String {
        match self {
            RuntimeEndpoint::Local => "local".to_string(),
            RuntimeEndpoint::Unix(path) => format!("unix://{}", path.display()),
            RuntimeEndpoint::Tcp(addr) => addr.clone(),
        }
    }
}

impl FromStr for RuntimeEndpoint {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "local" {
            return Ok(RuntimeEndpoint::Local);
        }
        if let Some(path) = s.strip_prefix("unix://") {
            return Ok(RuntimeEndpoint::Unix(PathBuf::from(path)));
        }
        if s.starts_with("tcp://") || s.starts_with("http://") {
            return Ok(RuntimeEndpoint::Tcp(s.to_string()));
        }
        if s.starts_with("ssh://") {
            return Err(RuntimeError::Unavailable(format!(
                "{s}: ssh transport is not built in; open the tunnel externally and \
                 point runtime_endpoint at the forwarded unix socket"
            )));
        }
        if s.starts_with('/') {
            return Ok(RuntimeEndpoint::Unix(PathBuf::from(s)));
        }
        Err(RuntimeError::Unavailable(format!(
            "unsupported runtime endpoint: {s}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(running: bool, paused: bool, restarting: bool, dead: bool) -> StateFlags {
        StateFlags {
            running,
            paused,
            restarting,
            dead,
        }
    }

    #[test]
    fn test_map_status_each_state() {
        assert_eq!(map_status(flags(true, false, false, false)), ContainerStatus::Running);
        assert_eq!(map_status(flags(false, true, false, false)), ContainerStatus::Paused);
        assert_eq!(
            map_status(flags(false, false, true, false)),
            ContainerStatus::Restarting
        );
        assert_eq!(map_status(flags(false, false, false, true)), ContainerStatus::Exited);
        // created / exited / anything else
        assert_eq!(map_status(StateFlags::default()), ContainerStatus::Stopped);
    }

    #[test]
    fn test_map_status_precedence() {
        assert_eq!(map_status(flags(true, true, true, true)), ContainerStatus::Running);
        assert_eq!(map_status(flags(false, true, true, true)), ContainerStatus::Paused);
        assert_eq!(
            map_status(flags(false, false, true, true)),
            ContainerStatus::Restarting
        );
    }

    #[test]
    fn test_map_status_is_total() {
        for bits in 0u8..16 {
            let status = map_status(flags(
                bits & 1 != 0,
                bits & 2 != 0,
                bits & 4 != 0,
                bits & 8 != 0,
            ));
            assert_ne!(status, ContainerStatus::Unknown);
        }
    }

    #[test]
    fn test_detail_into_record() {
        let detail = ContainerDetail {
            id: "abc".into(),
            name: "web".into(),
            image: "nginx:latest".into(),
            state: flags(false, false, false, true),
            ports: vec![],
            env: BTreeMap::new(),
            created_at: None,
        };

        let record = detail.into_record("host-1");
        assert_eq!(record.status, ContainerStatus::Exited);
        assert_eq!(record.host_id, "host-1");
    }

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!("".parse::<RuntimeEndpoint>().unwrap(), RuntimeEndpoint::Local);
        assert_eq!(
            "unix:///var/run/docker.sock".parse::<RuntimeEndpoint>().unwrap(),
            RuntimeEndpoint::Unix(PathBuf::from("/var/run/docker.sock"))
        );
        assert_eq!(
            "tcp://10.0.0.5:2375".parse::<RuntimeEndpoint>().unwrap(),
            RuntimeEndpoint::Tcp("tcp://10.0.0.5:2375".into())
        );
        assert!("ssh://deploy@remote".parse::<RuntimeEndpoint>().is_err());
        assert!("ftp://nope".parse::<RuntimeEndpoint>().is_err());
    }
}
