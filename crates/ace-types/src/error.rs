use thiserror::Error;

/// Errors shared across crates that have no more specific home.
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("invalid content id: {0}")]
    InvalidContentId(String),

    #[error("invalid vpn id: {0}")]
    InvalidVpnId(String),

    #[error("value out of range: {0}")]
    OutOfRange(String),
}

pub type Result<T> = std::result::Result<T, CommonError>;
