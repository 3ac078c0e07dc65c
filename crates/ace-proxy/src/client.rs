use crate::error::{ProxyError, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct StreamHandle {
    pub playback_url: String,
    pub stat_url: Option<String>,
    pub command_url: Option<String>,
    pub playback_session_id: Option<String>,
    #[serde(default)]
    pub is_live: bool,
}

#[derive(Debug, Deserialize)]
struct GetStreamResponse {
    response: Option<StreamHandle>,
    error: Option<String>,
}

/// Client for the parts of the AceStream engine HTTP API the proxy needs:
/// opening a stream, issuing the best-effort stop command. Connect/read
/// timeouts are short — control-plane calls, not the stream body itself.
#[derive(Clone)]
pub struct EngineClient {
    http: reqwest::Client,
}

impl EngineClient {
    pub fn new() -> Self {
        Self { http: reqwest::Client::builder().connect_timeout(Duration::from_secs(5)).timeout(Duration::from_secs(10)).build().unwrap_or_default() }
    }

    /// `GET /ace/getstream?format=json&infohash=<id>&pid=<uuid>`. The PID
    /// is per-session: two concurrent opens on the same engine for the
    /// same content id, with different PIDs, are independent streams.
    pub async fn open_stream(&self, host: &str, http_port: u16, content_id: &str, pid: &str) -> Result<StreamHandle> {
        let url = format!("http://{host}:{http_port}/ace/getstream?format=json&infohash={content_id}&pid={pid}");
        let body: GetStreamResponse = self.http.get(&url).send().await?.json().await.map_err(ProxyError::Upstream)?;
        if let Some(err) = body.error {
            return Err(ProxyError::EngineRejected(err));
        }
        body.response.ok_or_else(|| ProxyError::InvalidResponse("getstream returned neither response nor error".into()))
    }

    /// Best-effort teardown; a failure here is logged by the caller, never
    /// propagated, since the session is going away either way.
    pub async fn stop(&self, command_url: &str) -> Result<()> {
        let url = format!("{command_url}?method=stop");
        self.http.get(&url).send().await?;
        Ok(())
    }
}

impl Default for EngineClient {
    fn default() -> Self {
        Self::new()
    }
}
