use crate::error::{DockerError, Result};
use crate::types::{ContainerHealth, ContainerSpec, ContainerStatus, ManagedContainer};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;

/// Everything the engine controller and VPN coordinator need from a
/// container runtime. Behind a trait (rather than a free-standing struct,
/// as the teacher's pooled `ContainerManager` is) so tests can substitute a
/// mock and so the composition root is the only place that owns a real
/// `bollard::Docker` handle — no process-wide connection pool singleton.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run(&self, spec: ContainerSpec) -> Result<String>;
    async fn start(&self, id: &str) -> Result<()>;
    async fn stop(&self, id: &str, timeout_secs: i64) -> Result<()>;
    async fn remove(&self, id: &str, force: bool) -> Result<()>;
    async fn status(&self, id: &str) -> Result<ContainerStatus>;
    async fn health_status(&self, id: &str) -> Result<ContainerHealth>;
    async fn wait_running(&self, id: &str, timeout_dur: Duration) -> Result<()>;
    async fn list_managed(&self, label_key: &str) -> Result<Vec<ManagedContainer>>;
    async fn exec(&self, id: &str, cmd: Vec<String>) -> Result<String>;
}

/// Thin wrapper over `bollard::Docker`. Bollard pools connections over
/// hyper internally, so there is no need for an extra connection-pool
/// layer on top — one clone of the client, held by whoever constructs
/// this at the composition root, is enough.
pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn connect_with_local_defaults() -> Result<Self> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn run(&self, spec: ContainerSpec) -> Result<String> {
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .port_bindings
            .iter()
            .map(|(container_port, host_port)| {
                (
                    format!("{container_port}/tcp"),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host_port.to_string()),
                    }]),
                )
            })
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: spec.network_mode.clone(),
            restart_policy: Some(bollard::models::RestartPolicy {
                name: Some(bollard::models::RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(spec.labels.clone()),
            cmd: spec.cmd.clone(),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let created = self.docker.create_container(Some(options), config).await?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker.start_container(id, None::<StartContainerOptions<String>>).await?;
        Ok(())
    }

    async fn stop(&self, id: &str, timeout_secs: i64) -> Result<()> {
        let options = StopContainerOptions { t: timeout_secs };
        self.docker.stop_container(id, Some(options)).await?;
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions { force, v: true, ..Default::default() };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    async fn status(&self, id: &str) -> Result<ContainerStatus> {
        match self.docker.inspect_container(id, None).await {
            Ok(info) => {
                let Some(state) = info.state else {
                    return Ok(ContainerStatus::NotFound);
                };
                if state.running.unwrap_or(false) {
                    Ok(ContainerStatus::Running)
                } else if state.paused.unwrap_or(false) {
                    Ok(ContainerStatus::Paused)
                } else if state.restarting.unwrap_or(false) {
                    Ok(ContainerStatus::Restarting)
                } else if state.dead.unwrap_or(false) {
                    Ok(ContainerStatus::Dead)
                } else {
                    Ok(ContainerStatus::Stopped)
                }
            }
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(ContainerStatus::NotFound)
            }
            Err(e) => Err(DockerError::ApiError(e)),
        }
    }

    async fn health_status(&self, id: &str) -> Result<ContainerHealth> {
        match self.docker.inspect_container(id, None).await {
            Ok(info) => {
                let status = info
                    .state
                    .and_then(|s| s.health)
                    .and_then(|h| h.status)
                    .map(|s| match s {
                        bollard::models::HealthStatusEnum::HEALTHY => ContainerHealth::Healthy,
                        bollard::models::HealthStatusEnum::UNHEALTHY => ContainerHealth::Unhealthy,
                        bollard::models::HealthStatusEnum::STARTING => ContainerHealth::Starting,
                        _ => ContainerHealth::None,
                    })
                    .unwrap_or(ContainerHealth::None);
                Ok(status)
            }
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Err(DockerError::ContainerNotFound(id.to_owned()))
            }
            Err(e) => Err(DockerError::ApiError(e)),
        }
    }

    async fn wait_running(&self, id: &str, timeout_dur: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout_dur;
        loop {
            if self.status(id).await? == ContainerStatus::Running {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DockerError::StartupTimeout(id.to_owned(), "running".to_owned()));
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    }

    async fn list_managed(&self, label_key: &str) -> Result<Vec<ManagedContainer>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_owned(), vec![label_key.to_owned()]);
        let options = ListContainersOptions { all: true, filters, ..Default::default() };
        let summaries = self.docker.list_containers(Some(options)).await?;
        Ok(summaries
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_owned())
                    .unwrap_or_else(|| id.clone());
                let status = c.state.as_deref().map(ContainerStatus::from).unwrap_or(ContainerStatus::NotFound);
                Some(ManagedContainer { id, name, status, labels: c.labels.unwrap_or_default() })
            })
            .collect())
    }

    async fn exec(&self, id: &str, cmd: Vec<String>) -> Result<String> {
        let exec_options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(cmd),
            ..Default::default()
        };
        let exec = self.docker.create_exec(id, exec_options).await?;
        let started = timeout(Duration::from_secs(30), self.docker.start_exec(&exec.id, None)).await
            .map_err(|_| DockerError::StartupTimeout(id.to_owned(), "exec".to_owned()))??;

        if let StartExecResults::Attached { mut output, .. } = started {
            let mut result = String::new();
            while let Some(Ok(msg)) = output.next().await {
                result.push_str(&msg.to_string());
            }
            Ok(result)
        } else {
            Ok(String::new())
        }
    }
}
