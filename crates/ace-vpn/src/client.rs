use serde::Deserialize;
use std::time::Duration;

/// Thin `reqwest` client for a single Gluetun-compatible sidecar's control
/// API. Every call is a plain GET against the container's own hostname —
/// sidecars are reached over the Docker user-defined network, not through
/// the VPN tunnel itself.
#[derive(Clone)]
pub struct GluetunClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PortForwardedResponse {
    port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PublicIpInfo {
    pub public_ip: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug)]
pub enum PortForwardOutcome {
    Port(u16),
    NotSupported,
    Error(reqwest::Error),
}

impl GluetunClient {
    pub fn new(container_name: &str, api_port: u16) -> Self {
        Self {
            http: reqwest::Client::builder().timeout(Duration::from_secs(10)).build().unwrap_or_default(),
            base_url: format!("http://{container_name}:{api_port}"),
        }
    }

    /// `GET /v1/openvpn/portforwarded`. A 401 means the VPN provider
    /// configuration does not support port forwarding at all — that is a
    /// steady state, not a failure (spec.md §4.2.1).
    pub async fn get_forwarded_port(&self) -> PortForwardOutcome {
        let url = format!("{}/v1/openvpn/portforwarded", self.base_url);
        let resp = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return PortForwardOutcome::Error(e),
        };
        if resp.status().as_u16() == 401 {
            return PortForwardOutcome::NotSupported;
        }
        match resp.error_for_status() {
            Ok(resp) => match resp.json::<PortForwardedResponse>().await {
                Ok(body) => body.port.map(PortForwardOutcome::Port).unwrap_or(PortForwardOutcome::NotSupported),
                Err(e) => PortForwardOutcome::Error(e),
            },
            Err(e) => PortForwardOutcome::Error(e),
        }
    }

    /// `GET /v1/publicip/ip`. Informational only — failures are swallowed
    /// by the caller, never surfaced as a health signal.
    pub async fn get_public_ip(&self) -> Option<PublicIpInfo> {
        let url = format!("{}/v1/publicip/ip", self.base_url);
        self.http.get(&url).send().await.ok()?.json::<PublicIpInfo>().await.ok()
    }
}
