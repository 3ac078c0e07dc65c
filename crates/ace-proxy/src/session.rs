use crate::client::StreamHandle;
use crate::config::ProxyConfig;
use crate::ring_buffer::RingBuffer;
use ace_types::ContentId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A single client multiplexed onto a session's upstream stream.
struct ClientEntry {
    last_heartbeat: DateTime<Utc>,
}

/// One upstream AceStream playback, fanned out to every connected client.
/// Owns the ring buffer, the client roster, and the upstream reader task;
/// the [`crate::manager::ProxySessionManager`] owns the map from content id
/// to session and the engine/stream bookkeeping around it.
pub struct ProxySession {
    pub content_id: ContentId,
    pub container_id: String,
    pub engine_host: String,
    pub engine_port: u16,
    pub handle: StreamHandle,
    pub started_at: DateTime<Utc>,
    pub ring: Arc<RingBuffer>,
    clients: Mutex<HashMap<Uuid, ClientEntry>>,
    stopped: AtomicBool,
}

impl ProxySession {
    /// Spawns the upstream reader and returns the session handle. The
    /// reader keeps running until `stop()` is called or the upstream ends
    /// on its own.
    pub fn spawn(
        content_id: ContentId,
        container_id: String,
        engine_host: String,
        engine_port: u16,
        handle: StreamHandle,
        config: Arc<ProxyConfig>,
    ) -> Arc<Self> {
        let ring = Arc::new(RingBuffer::new(config.ring_buffer_capacity));
        let session = Arc::new(Self {
            content_id,
            container_id,
            engine_host,
            engine_port,
            handle: handle.clone(),
            started_at: Utc::now(),
            ring: ring.clone(),
            clients: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        });

        let reader_session = session.clone();
        tokio::spawn(async move {
            read_upstream(handle.playback_url, ring, reader_session, config).await;
        });

        session
    }

    /// Registers a client and returns the absolute ring buffer index it
    /// should start reading from (the current head, so it only sees data
    /// from this point on).
    pub fn add_client(&self, client_id: Uuid) -> u64 {
        let mut clients = self.clients.lock().unwrap();
        clients.insert(client_id, ClientEntry { last_heartbeat: Utc::now() });
        drop(clients);
        self.ring.head_index()
    }

    /// Removes a client, returning the number of clients still attached.
    pub fn remove_client(&self, client_id: &Uuid) -> usize {
        let mut clients = self.clients.lock().unwrap();
        clients.remove(client_id);
        clients.len()
    }

    pub fn heartbeat(&self, client_id: &Uuid) {
        if let Some(entry) = self.clients.lock().unwrap().get_mut(client_id) {
            entry.last_heartbeat = Utc::now();
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Drops any client whose heartbeat is older than `ttl`, treating it
    /// the same as an orderly disconnect. Returns the remaining count.
    pub fn sweep_ghosts(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|id, entry| {
            let age = (now - entry.last_heartbeat).to_std().unwrap_or(Duration::ZERO);
            let alive = age < ttl;
            if !alive {
                debug!(%id, "dropping ghost client with no recent heartbeat");
            }
            alive
        });
        clients.len()
    }

    /// Signals the upstream reader to stop. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.ring.mark_writer_done();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// A stream of chunks for one downstream client, starting at
    /// `start_index`, ending when the session stops, the upstream fails,
    /// or the upstream ends cleanly with nothing left to drain.
    pub fn chunk_stream(self: &Arc<Self>, start_index: u64) -> impl Stream<Item = Bytes> {
        let state = ChunkStreamState { session: self.clone(), index: start_index, queue: VecDeque::new() };
        futures_util::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(chunk) = state.queue.pop_front() {
                    return Some((chunk, state));
                }

                if state.session.is_stopped() || state.session.ring.is_failed() {
                    return None;
                }

                let result = state.session.ring.read_from(state.index);
                state.index = result.next_index;
                if !result.chunks.is_empty() {
                    state.queue = result.chunks.into();
                    continue;
                }

                if !state.session.ring.is_writer_alive() {
                    return None;
                }

                state.session.ring.wait_for_data().await;
            }
        })
    }
}

struct ChunkStreamState {
    session: Arc<ProxySession>,
    index: u64,
    queue: VecDeque<Bytes>,
}

/// Pulls chunks from the engine's playback URL into the session's ring
/// buffer until the upstream ends, the session is stopped, or the upstream
/// has produced nothing for `no_data_check_interval * no_data_timeout_checks`
/// straight — the last case is expected for live video (a momentary stall,
/// or the tail of a VOD) and is logged at INFO rather than treated as a
/// failure; an actual connection or read error is logged at WARN and marks
/// the buffer failed so waiting clients are told to give up.
async fn read_upstream(playback_url: String, ring: Arc<RingBuffer>, session: Arc<ProxySession>, config: Arc<ProxyConfig>) {
    let content_id = &session.content_id;
    info!(%content_id, url = %playback_url, "starting upstream stream reader");

    let client = match reqwest::Client::builder().connect_timeout(config.connect_timeout).build() {
        Ok(client) => client,
        Err(err) => {
            warn!(%content_id, error = %err, "failed to build upstream http client");
            ring.mark_failed();
            ring.mark_writer_done();
            return;
        }
    };

    let response = match client.get(&playback_url).send().await {
        Ok(resp) => match resp.error_for_status() {
            Ok(resp) => resp,
            Err(err) => {
                warn!(%content_id, error = %err, "upstream returned an error status opening the stream");
                ring.mark_failed();
                ring.mark_writer_done();
                return;
            }
        },
        Err(err) => {
            warn!(%content_id, error = %err, "failed to open upstream stream");
            ring.mark_failed();
            ring.mark_writer_done();
            return;
        }
    };

    let mut stream = response.bytes_stream();
    let mut consecutive_empty_ticks: u32 = 0;

    loop {
        if session.is_stopped() {
            info!(%content_id, "upstream stream reader stopped on shutdown signal");
            break;
        }

        match tokio::time::timeout(config.no_data_check_interval, stream.next()).await {
            Ok(Some(Ok(bytes))) => {
                consecutive_empty_ticks = 0;
                if !bytes.is_empty() {
                    ring.push(bytes);
                }
            }
            Ok(Some(Err(err))) => {
                warn!(%content_id, error = %err, "upstream stream read error");
                ring.mark_failed();
                break;
            }
            Ok(None) => {
                info!(%content_id, "upstream stream ended cleanly");
                break;
            }
            Err(_) => {
                consecutive_empty_ticks += 1;
                if consecutive_empty_ticks >= config.no_data_timeout_checks {
                    info!(%content_id, "upstream produced no data for the configured silence budget, ending reader");
                    break;
                }
            }
        }
    }

    ring.mark_writer_done();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> StreamHandle {
        StreamHandle {
            playback_url: "http://127.0.0.1:0/stream".into(),
            stat_url: None,
            command_url: Some("http://127.0.0.1:0/cmd".into()),
            playback_session_id: Some("sid".into()),
            is_live: true,
        }
    }

    fn content_id() -> ContentId {
        ContentId::parse(&"a".repeat(40)).unwrap()
    }

    #[tokio::test]
    async fn add_client_starts_at_current_head_and_counts_correctly() {
        let session = ProxySession::spawn(content_id(), "c1".into(), "127.0.0.1".into(), 40000, handle(), Arc::new(ProxyConfig::default()));
        session.stop();

        let id = Uuid::new_v4();
        let start = session.add_client(id);
        assert_eq!(start, 0);
        assert_eq!(session.client_count(), 1);

        let remaining = session.remove_client(&id);
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn ghost_sweep_drops_stale_clients_only() {
        let session = ProxySession::spawn(content_id(), "c1".into(), "127.0.0.1".into(), 40000, handle(), Arc::new(ProxyConfig::default()));
        session.stop();

        let fresh = Uuid::new_v4();
        let stale = Uuid::new_v4();
        session.add_client(fresh);
        session.add_client(stale);

        session.heartbeat(&fresh);
        {
            let mut clients = session.clients.lock().unwrap();
            clients.get_mut(&stale).unwrap().last_heartbeat = Utc::now() - chrono::Duration::seconds(999);
        }

        let remaining = session.sweep_ghosts(Duration::from_secs(45), Utc::now());
        assert_eq!(remaining, 1);
        assert_eq!(session.client_count(), 1);
    }
}
