use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortError {
    #[error("no free ports in range {0}-{1}")]
    Exhausted(u16, u16),

    #[error("unknown vpn pool: {0}")]
    UnknownVpnPool(String),

    #[error("invalid port range '{0}': expected \"start-end\"")]
    InvalidRange(String),
}

pub type Result<T> = std::result::Result<T, PortError>;
