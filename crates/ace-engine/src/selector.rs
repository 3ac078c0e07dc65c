use ace_state::StateStore;
use ace_types::EngineRecord;
use std::collections::HashMap;

/// Picks the best engine for a new stream request without mutating any
/// state (spec.md §4.5).
pub struct EngineSelector<'a> {
    state: &'a StateStore,
    max_streams_per_engine: Option<usize>,
}

impl<'a> EngineSelector<'a> {
    pub fn new(state: &'a StateStore, max_streams_per_engine: Option<usize>) -> Self {
        Self { state, max_streams_per_engine }
    }

    /// `require_vpn_healthy` lets the caller pass down the current set of
    /// healthy VPN ids; engines on a VPN that is not in that set are
    /// filtered out. Pass `None` when VPN mode is disabled.
    pub fn select(&self, healthy_vpns: Option<&[ace_types::VpnId]>) -> Option<EngineRecord> {
        let counts = self.state.active_stream_counts();
        let mut candidates: Vec<EngineRecord> = self
            .state
            .list_engines()
            .into_iter()
            .filter(|e| e.health == ace_types::EngineHealth::Healthy)
            .filter(|e| match (&e.vpn_id, healthy_vpns) {
                (Some(vpn), Some(healthy)) => healthy.contains(vpn),
                (None, Some(_)) => false,
                _ => true,
            })
            .filter(|e| {
                let count = counts.get(&e.container_id).copied().unwrap_or(0);
                self.max_streams_per_engine.map(|max| count < max).unwrap_or(true)
            })
            .collect();

        candidates.sort_by_key(|e| sort_key(e, &counts));
        candidates.into_iter().next()
    }
}

/// `(active_stream_count asc, !forwarded, last_stream_usage asc)` — fewer
/// streams first, forwarded engines preferred on ties, then the engine
/// idle longest (spec.md §4.5 step 2).
fn sort_key(e: &EngineRecord, counts: &HashMap<String, usize>) -> (usize, bool, i64) {
    let count = counts.get(&e.container_id).copied().unwrap_or(0);
    let idle_since = e.last_stream_usage.map(|t| t.timestamp()).unwrap_or(0);
    (count, !e.forwarded, idle_since)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ace_state::StateStore;
    use ace_types::{ContentId, EngineHealth, StreamRecord, StreamStatus};
    use chrono::Utc;

    fn healthy_engine(id: &str, forwarded: bool) -> EngineRecord {
        let mut e = EngineRecord::new(id, format!("acestream-{id}"), "127.0.0.1", 40000);
        e.health = EngineHealth::Healthy;
        e.forwarded = forwarded;
        e
    }

    #[test]
    fn prefers_least_loaded_engine() {
        let store = StateStore::new();
        store.add_engine(healthy_engine("c1", false));
        store.add_engine(healthy_engine("c2", false));
        let content = ContentId::parse(&"a".repeat(40)).unwrap();
        store.record_stream_start(StreamRecord {
            content_id: content,
            container_id: "c1".into(),
            playback_url: "http://x".into(),
            stat_url: None,
            command_url: None,
            playback_session_id: None,
            started_at: Utc::now(),
            status: StreamStatus::Started,
            bytes_sent: 0,
        });
        let selector = EngineSelector::new(&store, None);
        let chosen = selector.select(None).unwrap();
        assert_eq!(chosen.container_id, "c2");
    }

    #[test]
    fn prefers_forwarded_on_tie() {
        let store = StateStore::new();
        store.add_engine(healthy_engine("c1", false));
        store.add_engine(healthy_engine("c2", true));
        let selector = EngineSelector::new(&store, None);
        let chosen = selector.select(None).unwrap();
        assert_eq!(chosen.container_id, "c2");
    }

    #[test]
    fn respects_per_engine_stream_limit() {
        let store = StateStore::new();
        store.add_engine(healthy_engine("c1", false));
        let content = ContentId::parse(&"a".repeat(40)).unwrap();
        store.record_stream_start(StreamRecord {
            content_id: content,
            container_id: "c1".into(),
            playback_url: "http://x".into(),
            stat_url: None,
            command_url: None,
            playback_session_id: None,
            started_at: Utc::now(),
            status: StreamStatus::Started,
            bytes_sent: 0,
        });
        let selector = EngineSelector::new(&store, Some(1));
        assert!(selector.select(None).is_none());
    }
}
