use crate::content_id::ContentId;
use crate::vpn::VpnId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Health classification of a single engine, as tracked by the health manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

impl Default for EngineHealth {
    fn default() -> Self {
        EngineHealth::Unknown
    }
}

/// A managed AceStream engine container (spec.md §3 "Engine").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRecord {
    pub container_id: String,
    pub container_name: String,
    pub host: String,
    pub http_port: u16,
    pub https_port: Option<u16>,
    pub vpn_id: Option<VpnId>,
    pub forwarded: bool,
    pub health: EngineHealth,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_stream_usage: Option<DateTime<Utc>>,
    pub cache_size_bytes: u64,
    pub active_streams: HashSet<ContentId>,
}

impl EngineRecord {
    pub fn new(container_id: impl Into<String>, container_name: impl Into<String>, host: impl Into<String>, http_port: u16) -> Self {
        let now = Utc::now();
        Self {
            container_id: container_id.into(),
            container_name: container_name.into(),
            host: host.into(),
            http_port,
            https_port: None,
            vpn_id: None,
            forwarded: false,
            health: EngineHealth::Unknown,
            first_seen: now,
            last_seen: now,
            last_health_check: None,
            last_stream_usage: None,
            cache_size_bytes: 0,
            active_streams: HashSet::new(),
        }
    }

    pub fn active_stream_count(&self) -> usize {
        self.active_streams.len()
    }
}
