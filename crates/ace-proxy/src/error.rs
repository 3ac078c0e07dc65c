use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("no healthy engine available for this content id")]
    NoEngineAvailable,

    #[error("on-demand engine provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("engine rejected stream open: {0}")]
    EngineRejected(String),

    #[error("stream unavailable: no data arrived within the initial wait window")]
    StreamUnavailable,

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("invalid engine response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
