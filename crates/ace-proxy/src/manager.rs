use crate::client::EngineClient;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::session::ProxySession;
use ace_engine::{EngineController, EngineSelector};
use ace_state::StateStore;
use ace_types::{ContentId, EngineRecord, EventSink, OrchestratorEvent, StreamRecord, StreamStatus, VpnId, VpnMode};
use ace_vpn::VpnFleet;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

/// One upstream stream per content id, fanned out to every client asking
/// for it. Creation is serialized per content id through `creation_lock`
/// so two concurrent first-requests for the same content id cannot both
/// open the engine's stream endpoint.
pub struct ProxySessionManager {
    sessions: Arc<DashMap<ContentId, Arc<ProxySession>>>,
    creation_lock: AsyncMutex<()>,
    engine_client: EngineClient,
    controller: Arc<EngineController>,
    vpn: Arc<VpnFleet>,
    state: Arc<StateStore>,
    events: Arc<dyn EventSink>,
    config: Arc<ProxyConfig>,
}

impl ProxySessionManager {
    pub fn new(controller: Arc<EngineController>, vpn: Arc<VpnFleet>, state: Arc<StateStore>, events: Arc<dyn EventSink>, config: ProxyConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            creation_lock: AsyncMutex::new(()),
            engine_client: EngineClient::new(),
            controller,
            vpn,
            state,
            events,
            config: Arc::new(config),
        }
    }

    /// Returns the existing session for `content_id`, or opens a new one.
    /// If no healthy engine can be selected, provisions one on demand
    /// before giving up.
    pub async fn get_or_create_session(&self, content_id: &ContentId) -> Result<Arc<ProxySession>> {
        if let Some(existing) = self.sessions.get(content_id) {
            return Ok(existing.value().clone());
        }

        let _guard = self.creation_lock.lock().await;
        if let Some(existing) = self.sessions.get(content_id) {
            return Ok(existing.value().clone());
        }

        let engine = match self.select_engine() {
            Some(engine) => engine,
            None => {
                info!(%content_id, "no engine available, provisioning one on demand");
                self.controller.provision_engine(None).await.map_err(|err| ProxyError::ProvisioningFailed(err.to_string()))?
            }
        };

        let pid = Uuid::new_v4().to_string();
        let handle = self.engine_client.open_stream(&engine.host, engine.http_port, content_id.as_str(), &pid).await?;

        let session = ProxySession::spawn(content_id.clone(), engine.container_id.clone(), engine.host.clone(), engine.http_port, handle.clone(), self.config.clone());

        self.state.attach_stream(&engine.container_id, content_id);
        self.state.record_stream_start(StreamRecord {
            content_id: content_id.clone(),
            container_id: engine.container_id.clone(),
            playback_url: handle.playback_url.clone(),
            stat_url: handle.stat_url.clone(),
            command_url: handle.command_url.clone(),
            playback_session_id: handle.playback_session_id.clone(),
            started_at: session.started_at,
            status: StreamStatus::Started,
            bytes_sent: 0,
        });

        self.sessions.insert(content_id.clone(), session.clone());
        self.events.publish(OrchestratorEvent::SessionStarted { content_id: content_id.clone(), container_id: engine.container_id.clone() });
        info!(%content_id, container_id = %engine.container_id, "proxy session created");

        Ok(session)
    }

    fn select_engine(&self) -> Option<EngineRecord> {
        let healthy_vpns: Vec<VpnId> = self.vpn.configured_vpns().into_iter().filter(|v| self.vpn.is_healthy(v)).collect();
        let selector = EngineSelector::new(&self.state, self.config.max_streams_per_engine);
        if self.vpn.mode() == VpnMode::Disabled {
            selector.select(None)
        } else {
            selector.select(Some(&healthy_vpns))
        }
    }

    /// Registers `client_id` against the content id's session, creating it
    /// if needed. Returns the absolute ring buffer index the client should
    /// start reading from.
    pub async fn add_client(&self, content_id: &ContentId, client_id: Uuid) -> Result<(Arc<ProxySession>, u64)> {
        let session = self.get_or_create_session(content_id).await?;
        let start_index = session.add_client(client_id);
        Ok((session, start_index))
    }

    pub fn heartbeat(&self, content_id: &ContentId, client_id: Uuid) {
        if let Some(session) = self.sessions.get(content_id) {
            session.heartbeat(&client_id);
        }
    }

    /// Removes a client; if it was the last one, schedules teardown after
    /// the configured grace period so a quick reconnect (a player seeking)
    /// does not pay the cost of reopening the upstream.
    pub fn remove_client(&self, content_id: &ContentId, client_id: Uuid) {
        let Some(session) = self.sessions.get(content_id).map(|entry| entry.value().clone()) else { return };
        let remaining = session.remove_client(&client_id);
        if remaining == 0 {
            self.schedule_teardown(content_id.clone());
        }
    }

    /// Tears down `content_id`'s session after the grace period, unless a
    /// client has joined again in the meantime.
    fn schedule_teardown(&self, content_id: ContentId) {
        let sessions = self.sessions.clone();
        let events = self.events.clone();
        let engine_client = self.engine_client.clone();
        let state = self.state.clone();
        let grace_period = self.config.grace_period;

        tokio::spawn(async move {
            sleep(grace_period).await;

            let still_empty = sessions.get(&content_id).map(|entry| entry.client_count() == 0).unwrap_or(false);
            if !still_empty {
                return;
            }

            if let Some((_, session)) = sessions.remove(&content_id) {
                teardown(session, &content_id, &engine_client, &state).await;
                events.publish(OrchestratorEvent::SessionEnded { content_id });
            }
        });
    }

    /// Immediately tears down a session regardless of client count, e.g.
    /// when the upstream reader has reported a failure.
    pub async fn remove_failed_session(&self, content_id: &ContentId, reason: &str) {
        if let Some((_, session)) = self.sessions.remove(content_id) {
            warn!(%content_id, reason, "removing failed proxy session");
            teardown(session, content_id, &self.engine_client, &self.state).await;
            self.events.publish(OrchestratorEvent::SessionEnded { content_id: content_id.clone() });
        }
    }

    /// Periodic maintenance: drop ghost clients from every live session,
    /// tearing down any session that reaches zero clients as a result, and
    /// tear down any session whose upstream reader has failed (spec.md
    /// error-handling table: `UpstreamReadTimeout` -> session teardown,
    /// clients see EOF). A failed session is never reopened on its own —
    /// `read_upstream` only marks the ring failed and exits — so this sweep
    /// is what actually frees the content id for `get_or_create_session` to
    /// reprovision (spec.md §8 invariant 4).
    pub async fn sweep_ghosts(&self) {
        let now = chrono::Utc::now();
        let ttl = self.config.ghost_ttl();
        let failed: Vec<ContentId> = self.sessions.iter().filter(|entry| entry.value().ring.is_failed()).map(|entry| entry.key().clone()).collect();
        for content_id in failed {
            self.remove_failed_session(&content_id, "upstream reader failed").await;
        }

        let emptied: Vec<ContentId> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let remaining = entry.value().sweep_ghosts(ttl, now);
                if remaining == 0 {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect();

        for content_id in emptied {
            self.schedule_teardown(content_id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

async fn teardown(session: Arc<ProxySession>, content_id: &ContentId, engine_client: &EngineClient, state: &StateStore) {
    session.stop();
    state.detach_stream(&session.container_id, content_id);
    state.record_stream_stop(content_id);
    if let Some(command_url) = &session.handle.command_url {
        if let Err(err) = engine_client.stop(command_url).await {
            warn!(%content_id, error = %err, "best-effort engine stop command failed");
        }
    }
    info!(%content_id, "proxy session torn down");
}
