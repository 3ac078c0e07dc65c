use thiserror::Error;

#[derive(Error, Debug)]
pub enum VpnError {
    #[error("unknown vpn: {0}")]
    UnknownVpn(String),

    #[error("vpn api request failed: {0}")]
    Api(#[from] reqwest::Error),

    #[error("engine controller error: {0}")]
    Engine(#[from] ace_engine::EngineError),
}

pub type Result<T> = std::result::Result<T, VpnError>;
