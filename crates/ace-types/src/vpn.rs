use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical identifier of a VPN sidecar, e.g. its container name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VpnId(String);

impl VpnId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VpnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VpnId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Whether the fleet runs with no VPN, one VPN, or two redundant VPNs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnMode {
    Disabled,
    Single,
    Redundant,
}

/// Per-VPN health state machine states (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnStatus {
    Unknown,
    Starting,
    Healthy,
    Unhealthy,
    Restarting,
}

impl fmt::Display for VpnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VpnStatus::Unknown => "unknown",
            VpnStatus::Starting => "starting",
            VpnStatus::Healthy => "healthy",
            VpnStatus::Unhealthy => "unhealthy",
            VpnStatus::Restarting => "restarting",
        };
        write!(f, "{s}")
    }
}
