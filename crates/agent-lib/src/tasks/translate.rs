//! Translation of a declarative container spec into a runtime create request

use crate::models::{ContainerSpec, RestartPolicy};
use crate::runtime::{CreateRequest, MountRequest, PortBindingRequest, RestartRule};

pub const DEFAULT_PROTOCOL: &str = "tcp";
/// Bind to all interfaces when the spec names no host address
pub const DEFAULT_HOST_IP: &str = "0.0.0.0";
pub const ON_FAILURE_MAX_RETRIES: i64 = 3;

pub fn create_request(spec: &ContainerSpec) -> CreateRequest {
    CreateRequest {
        name: spec.name.clone().filter(|n| !n.is_empty()),
        image: spec.image.clone(),
        env: spec
            .env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect(),
        cmd: spec.command.clone().filter(|c| !c.is_empty()),
        working_dir: spec.working_dir.clone(),
        user: spec.user.clone(),
        ports: spec
            .ports
            .iter()
            .map(|port| PortBindingRequest {
                container_port: port.container_port,
                host_port: port.host_port,
                host_ip: port
                    .host_ip
                    .clone()
                    .filter(|ip| !ip.is_empty())
                    .unwrap_or_else(|| DEFAULT_HOST_IP.to_string()),
                protocol: port
                    .protocol
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .unwrap_or(DEFAULT_PROTOCOL)
                    .to_ascii_lowercase(),
            })
            .collect(),
        mounts: spec
            .volumes
            .iter()
            .map(|volume| MountRequest {
                source: volume.source.clone(),
                target: volume.target.clone(),
                read_only: volume.read_only,
            })
            .collect(),
        restart: restart_rule(spec.restart_policy),
    }
}

/// `on-failure` is bounded; the other policies carry no retry count
pub fn restart_rule(policy: RestartPolicy) -> RestartRule {
    let max_retries = match policy {
        RestartPolicy::OnFailure => Some(ON_FAILURE_MAX_RETRIES),
        _ => None,
    };
    RestartRule {
        policy,
        max_retries,
    }
}
