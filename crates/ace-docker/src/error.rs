use thiserror::Error;

#[derive(Error, Debug)]
pub enum DockerError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("timed out waiting for container {0} to reach state {1}")]
    StartupTimeout(String, String),

    #[error("docker api error: {0}")]
    ApiError(#[from] bollard::errors::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DockerError>;
