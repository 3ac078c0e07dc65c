use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Spec for a container the orchestrator wants running. Mirrors the
/// shape bollard's `Config` needs, but keeps call sites free of bollard
/// types until the last moment.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub cmd: Option<Vec<String>>,
    pub network_mode: Option<String>,
    pub port_bindings: HashMap<u16, u16>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = Some(cmd);
        self
    }

    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = Some(mode.into());
        self
    }

    pub fn with_port_binding(mut self, container_port: u16, host_port: u16) -> Self {
        self.port_bindings.insert(container_port, host_port);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    Running,
    Stopped,
    Paused,
    Restarting,
    Created,
    Dead,
    NotFound,
}

impl From<&str> for ContainerStatus {
    fn from(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "created" => ContainerStatus::Created,
            "dead" => ContainerStatus::Dead,
            "exited" | "stopped" => ContainerStatus::Stopped,
            _ => ContainerStatus::NotFound,
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Created => "created",
            ContainerStatus::Dead => "dead",
            ContainerStatus::NotFound => "not_found",
        };
        write!(f, "{s}")
    }
}

/// A running container observed during `list_managed`, trimmed to what the
/// engine controller's reindex (spec.md §4.1) actually needs.
#[derive(Debug, Clone)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub labels: HashMap<String, String>,
}

/// Docker's own `State.Health.Status`, read separately from container
/// lifecycle state (spec.md §4.2 "periodic poll of the container runtime
/// (status + health)"). `None` means the container has no `HEALTHCHECK`
/// configured at all, which the VPN coordinator treats as healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerHealth {
    Healthy,
    Unhealthy,
    Starting,
    None,
}
