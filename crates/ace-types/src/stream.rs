use crate::content_id::ContentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Started,
    Stopped,
}

/// A single active (or recently active) stream, owned by the state store
/// (spec.md §3 "Stream").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    pub content_id: ContentId,
    pub container_id: String,
    pub playback_url: String,
    pub stat_url: Option<String>,
    pub command_url: Option<String>,
    pub playback_session_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub status: StreamStatus,
    pub bytes_sent: u64,
}
