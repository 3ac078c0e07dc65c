//! HTTP-boundary error mapping. `anyhow::Error` is used only here, at the
//! composition-root/HTTP seam (SPEC_FULL.md A.4); everything below it
//! keeps its own typed error enum and propagates with `?`.

use ace_engine::EngineError;
use ace_proxy::ProxyError;
use ace_types::CommonError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Wraps any error reaching an axum handler and renders it as a JSON body
/// with an appropriate status code. Handlers return `Result<T, ApiError>`
/// and use `?` against `ace-*` crate errors via the `From` impls below.
pub struct ApiError(anyhow::Error, StatusCode);

impl ApiError {
    pub fn new(status: StatusCode, err: impl Into<anyhow::Error>) -> Self {
        Self(err.into(), status)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.0.to_string() }));
        (self.1, body).into_response()
    }
}

impl From<CommonError> for ApiError {
    fn from(err: CommonError) -> Self {
        Self(err.into(), StatusCode::BAD_REQUEST)
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        let status = match &err {
            ProxyError::NoEngineAvailable | ProxyError::ProvisioningFailed(_) | ProxyError::StreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::EngineRejected(_) | ProxyError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        Self(err.into(), status)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::PortExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::VpnUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::BreakerOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::ReplicaCapReached(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Runtime(_) => StatusCode::BAD_GATEWAY,
        };
        Self(err.into(), status)
    }
}
