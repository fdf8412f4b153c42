//! Docker Engine API implementation of the runtime contract

use super::{
    ContainerDetail, ContainerRef, ContainerRuntime, CreateRequest, EventStream, LifecycleEvent,
    RemoveOptions, RestartRule, RuntimeEndpoint, StateFlags, SystemInfo,
};
use crate::error::RuntimeError;
use crate::models::{PortMapping, RestartPolicy};
use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, EventMessage, EventMessageTypeEnum, HostConfig,
    PortBinding, PortMap, RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, EventsOptionsBuilder,
    InspectContainerOptions, ListContainersOptionsBuilder, RemoveContainerOptionsBuilder,
    RestartContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info};

/// Client timeout in seconds for the runtime control API
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Runtime adapter for Docker-compatible engines
pub struct DockerRuntime {
    docker: Docker,
    endpoint: String,
}

impl DockerRuntime {
    /// Connect to the runtime at `endpoint`. No request is made yet.
    pub fn connect(endpoint: &RuntimeEndpoint) -> Result<Self, RuntimeError> {
        let docker = match endpoint {
            RuntimeEndpoint::Local => Docker::connect_with_local_defaults(),
            RuntimeEndpoint::Unix(path) => Docker::connect_with_socket(
                &path.to_string_lossy(),
                DOCKER_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
            RuntimeEndpoint::Tcp(addr) => {
                Docker::connect_with_http(addr, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
        }
        .map_err(|e| {
            RuntimeError::Unavailable(format!("failed to connect to {}: {}", endpoint.label(), e))
        })?;

        info!(endpoint = %endpoint.label(), "Container runtime client configured");

        Ok(Self {
            docker,
            endpoint: endpoint.label(),
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(|e| {
            RuntimeError::Unavailable(format!("cannot reach runtime at {}: {}", self.endpoint, e))
        })?;
        Ok(())
    }

    async fn system_info(&self) -> Result<SystemInfo, RuntimeError> {
        let info = self
            .docker
            .info()
            .await
            .map_err(|e| map_bollard_error("info", &self.endpoint, e))?;

        Ok(SystemInfo {
            id: info.id.unwrap_or_default(),
            name: info.name.unwrap_or_default(),
            cpu_cores: info.ncpu.unwrap_or(0).max(0) as u32,
            memory_bytes: info.mem_total.unwrap_or(0).max(0) as u64,
        })
    }

    async fn list_containers(
        &self,
        include_stopped: bool,
    ) -> Result<Vec<ContainerRef>, RuntimeError> {
        let options = ListContainersOptionsBuilder::default()
            .all(include_stopped)
            .build();

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| map_bollard_error("list_containers", &self.endpoint, e))?;

        Ok(summaries
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                let name = summary
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                Some(ContainerRef { id, name })
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetail, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_bollard_error("inspect_container", id, e))?;

        Ok(detail_from_inspect(id, response))
    }

    fn events(&self) -> EventStream<'_> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let options = EventsOptionsBuilder::default().filters(&filters).build();

        let endpoint = self.endpoint.clone();
        self.docker
            .events(Some(options))
            .filter_map(move |item| {
                let endpoint = endpoint.clone();
                async move {
                    match item {
                        Ok(message) => lifecycle_event(message).map(Ok),
                        Err(e) => Some(Err(map_bollard_error("events", &endpoint, e))),
                    }
                }
            })
            .boxed()
    }

    async fn inspect_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.docker
            .inspect_image(image)
            .await
            .map(|_| ())
            .map_err(|e| match map_bollard_error("inspect_image", image, e) {
                RuntimeError::NotFound(_) => RuntimeError::ImageNotFound(image.to_string()),
                other => other,
            })
    }

    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        let (from_image, tag) = split_image_reference(image);
        let mut builder = CreateImageOptionsBuilder::default().from_image(from_image);
        if let Some(tag) = tag {
            builder = builder.tag(tag);
        }

        // Drain the progress stream fully; abandoning it mid-pull leaves the
        // daemon with a half-registered image.
        let progress = self
            .docker
            .create_image(Some(builder.build()), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| map_bollard_error("pull_image", image, e))?;

        debug!(image = %image, messages = progress.len(), "Image pull complete");
        Ok(())
    }

    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        let body = create_body(request);
        let target = request.name.clone().unwrap_or_else(|| request.image.clone());

        let options = request
            .name
            .as_deref()
            .map(|name| CreateContainerOptionsBuilder::default().name(name).build());

        let response = self
            .docker
            .create_container(options, body)
            .await
            .map_err(|e| map_bollard_error("create_container", &target, e))?;

        for warning in &response.warnings {
            debug!(container_id = %response.id, warning = %warning, "Runtime create warning");
        }

        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| map_bollard_error("start_container", id, e))
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptionsBuilder::default()
            .t(timeout_secs(timeout))
            .build();

        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| map_bollard_error("stop_container", id, e))
    }

    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let options = RestartContainerOptionsBuilder::default()
            .t(timeout_secs(timeout))
            .build();

        self.docker
            .restart_container(id, Some(options))
            .await
            .map_err(|e| map_bollard_error("restart_container", id, e))
    }

    async fn remove(&self, id: &str, options: RemoveOptions) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::default()
            .force(options.force)
            .v(options.remove_volumes)
            .build();

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_bollard_error("remove_container", id, e))
    }
}

/// Translate engine errors into the adapter taxonomy
fn map_bollard_error(operation: &'static str, target: &str, error: BollardError) -> RuntimeError {
    match error {
        BollardError::DockerResponseServerError { status_code, .. } if status_code == 404 => {
            RuntimeError::NotFound(target.to_string())
        }
        BollardError::DockerResponseServerError { status_code, .. } if status_code == 304 => {
            RuntimeError::NotModified(target.to_string())
        }
        other => RuntimeError::Operation {
            operation,
            target: target.to_string(),
            message: other.to_string(),
        },
    }
}

fn timeout_secs(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_secs()).unwrap_or(i32::MAX)
}

/// Split `repo[:tag]` without confusing a registry port for a tag
fn split_image_reference(image: &str) -> (&str, Option<&str>) {
    if image.contains('@') {
        return (image, None);
    }
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag)),
        _ => (image, Some("latest")),
    }
}

fn detail_from_inspect(requested_id: &str, response: ContainerInspectResponse) -> ContainerDetail {
    let state = response
        .state
        .map(|s| StateFlags {
            running: s.running.unwrap_or(false),
            paused: s.paused.unwrap_or(false),
            restarting: s.restarting.unwrap_or(false),
            dead: s.dead.unwrap_or(false),
        })
        .unwrap_or_default();

    let (image, env) = match response.config {
        Some(config) => (
            config.image.unwrap_or_default(),
            parse_env(config.env.unwrap_or_default()),
        ),
        None => (String::new(), BTreeMap::new()),
    };

    let ports = response
        .network_settings
        .and_then(|settings| settings.ports)
        .map(port_mappings)
        .unwrap_or_default();

    ContainerDetail {
        id: response.id.unwrap_or_else(|| requested_id.to_string()),
        name: response
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        image: if image.is_empty() {
            response.image.unwrap_or_default()
        } else {
            image
        },
        state,
        ports,
        env,
        created_at: response.created.as_deref().and_then(parse_timestamp),
    }
}

fn parse_env(entries: Vec<String>) -> BTreeMap<String, String> {
    entries
        .into_iter()
        .filter_map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Flatten published ports; IPv4 and IPv6 bindings of the same port collapse
fn port_mappings(ports: PortMap) -> Vec<PortMapping> {
    let mut mappings: Vec<PortMapping> = ports
        .into_iter()
        .filter_map(|(key, bindings)| {
            let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            let container_port: u16 = port.parse().ok()?;
            let protocol = protocol.to_string();
            Some(
                bindings
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|binding| binding.host_port?.parse::<u16>().ok())
                    .map(|host_port| PortMapping {
                        host_port,
                        container_port,
                        protocol: protocol.clone(),
                    })
                    .collect::<Vec<_>>(),
            )
        })
        .flatten()
        .collect();

    mappings.sort_by(|a, b| {
        (a.container_port, a.host_port, &a.protocol).cmp(&(b.container_port, b.host_port, &b.protocol))
    });
    mappings.dedup();
    mappings
}

fn lifecycle_event(message: EventMessage) -> Option<LifecycleEvent> {
    if message.typ != Some(EventMessageTypeEnum::CONTAINER) {
        return None;
    }
    let actor = message.actor?;
    let container_id = actor.id?;
    let name = actor
        .attributes
        .and_then(|mut attributes| attributes.remove("name"));

    Some(LifecycleEvent {
        action: message.action.unwrap_or_default(),
        container_id,
        name,
        time: message.time,
    })
}

fn restart_policy(rule: RestartRule) -> DockerRestartPolicy {
    let name = match rule.policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
    };
    DockerRestartPolicy {
        name: Some(name),
        maximum_retry_count: rule.max_retries,
    }
}

fn create_body(request: &CreateRequest) -> ContainerCreateBody {
    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    let mut port_bindings: PortMap = HashMap::new();

    for port in &request.ports {
        let key = format!("{}/{}", port.container_port, port.protocol);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings
            .entry(key)
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(PortBinding {
                host_ip: Some(port.host_ip.clone()),
                host_port: port.host_port.map(|p| p.to_string()),
            });
    }

    let binds: Vec<String> = request
        .mounts
        .iter()
        .map(|mount| {
            if mount.read_only {
                format!("{}:{}:ro", mount.source, mount.target)
            } else {
                format!("{}:{}", mount.source, mount.target)
            }
        })
        .collect();

    ContainerCreateBody {
        image: Some(request.image.clone()),
        env: (!request.env.is_empty()).then(|| request.env.clone()),
        cmd: request.cmd.clone(),
        working_dir: request.working_dir.clone(),
        user: request.user.clone(),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(HostConfig {
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            binds: (!binds.is_empty()).then_some(binds),
            restart_policy: Some(restart_policy(request.restart)),
            ..HostConfig::default()
        }),
        ..ContainerCreateBody::default()
    }
}
