use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no ports available: {0}")]
    PortExhausted(#[from] ace_ports::PortError),

    #[error("target vpn {0} is not healthy")]
    VpnUnavailable(String),

    #[error("container runtime error: {0}")]
    Runtime(#[from] ace_docker::DockerError),

    #[error("provisioning circuit breaker is open for context {0}")]
    BreakerOpen(String),

    #[error("engine not found: {0}")]
    NotFound(String),

    #[error("fleet is already at its replica cap ({0})")]
    ReplicaCapReached(usize),
}

pub type Result<T> = std::result::Result<T, EngineError>;
