use ace_types::{ContentId, EngineHealth, EngineRecord, StreamRecord, StreamStatus, VpnId};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct Inner {
    engines: HashMap<String, EngineRecord>,
    streams: HashMap<ContentId, StreamRecord>,
}

/// Owns the engine and stream tables. All mutators are atomic with respect
/// to each other (single `RwLock`); the store never hands out a guard, so
/// it is safe to call from any number of concurrent tasks (spec.md §5).
pub struct StateStore {
    inner: RwLock<Inner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn add_engine(&self, record: EngineRecord) {
        self.inner.write().unwrap().engines.insert(record.container_id.clone(), record);
    }

    /// Removing an engine must happen before its container is stopped, so
    /// that the selector (ace-engine) stops choosing it immediately
    /// (spec.md §5 "Ordering guarantees").
    pub fn remove_engine(&self, container_id: &str) -> Option<EngineRecord> {
        self.inner.write().unwrap().engines.remove(container_id)
    }

    pub fn get_engine(&self, container_id: &str) -> Option<EngineRecord> {
        self.inner.read().unwrap().engines.get(container_id).cloned()
    }

    pub fn list_engines(&self) -> Vec<EngineRecord> {
        self.inner.read().unwrap().engines.values().cloned().collect()
    }

    pub fn engines_for_vpn(&self, vpn: &VpnId) -> Vec<EngineRecord> {
        self.inner
            .read()
            .unwrap()
            .engines
            .values()
            .filter(|e| e.vpn_id.as_ref() == Some(vpn))
            .cloned()
            .collect()
    }

    pub fn has_forwarded_engine(&self, vpn: &VpnId) -> bool {
        self.inner
            .read()
            .unwrap()
            .engines
            .values()
            .any(|e| e.vpn_id.as_ref() == Some(vpn) && e.forwarded)
    }

    pub fn forwarded_engine(&self, vpn: &VpnId) -> Option<EngineRecord> {
        self.inner
            .read()
            .unwrap()
            .engines
            .values()
            .find(|e| e.vpn_id.as_ref() == Some(vpn) && e.forwarded)
            .cloned()
    }

    pub fn set_engine_vpn(&self, container_id: &str, vpn: Option<VpnId>) {
        if let Some(e) = self.inner.write().unwrap().engines.get_mut(container_id) {
            e.vpn_id = vpn;
        }
    }

    /// Sets `forwarded`. Enforces the invariant that at most one engine per
    /// VPN holds it (spec.md §8 property 1) by clearing any previous
    /// holder first.
    pub fn set_forwarded(&self, container_id: &str, vpn: &VpnId) {
        let mut guard = self.inner.write().unwrap();
        for e in guard.engines.values_mut() {
            if e.vpn_id.as_ref() == Some(vpn) && e.container_id != container_id {
                e.forwarded = false;
            }
        }
        if let Some(e) = guard.engines.get_mut(container_id) {
            e.forwarded = true;
        }
    }

    pub fn clear_forwarded(&self, container_id: &str) {
        if let Some(e) = self.inner.write().unwrap().engines.get_mut(container_id) {
            e.forwarded = false;
        }
    }

    pub fn set_engine_health(&self, container_id: &str, health: EngineHealth) {
        let mut guard = self.inner.write().unwrap();
        if let Some(e) = guard.engines.get_mut(container_id) {
            e.health = health;
            e.last_health_check = Some(Utc::now());
        }
    }

    pub fn touch_last_seen(&self, container_id: &str) {
        if let Some(e) = self.inner.write().unwrap().engines.get_mut(container_id) {
            e.last_seen = Utc::now();
        }
    }

    pub fn attach_stream(&self, container_id: &str, content_id: &ContentId) {
        if let Some(e) = self.inner.write().unwrap().engines.get_mut(container_id) {
            e.active_streams.insert(content_id.clone());
            e.last_stream_usage = Some(Utc::now());
        }
    }

    pub fn detach_stream(&self, container_id: &str, content_id: &ContentId) {
        if let Some(e) = self.inner.write().unwrap().engines.get_mut(container_id) {
            e.active_streams.remove(content_id);
            e.last_stream_usage = Some(Utc::now());
        }
    }

    pub fn record_stream_start(&self, stream: StreamRecord) {
        let mut guard = self.inner.write().unwrap();
        guard.streams.insert(stream.content_id.clone(), stream);
    }

    pub fn record_stream_stop(&self, content_id: &ContentId) {
        if let Some(s) = self.inner.write().unwrap().streams.get_mut(content_id) {
            s.status = StreamStatus::Stopped;
        }
    }

    pub fn get_stream(&self, content_id: &ContentId) -> Option<StreamRecord> {
        self.inner.read().unwrap().streams.get(content_id).cloned()
    }

    pub fn list_streams(&self, status: Option<StreamStatus>) -> Vec<StreamRecord> {
        self.inner
            .read()
            .unwrap()
            .streams
            .values()
            .filter(|s| status.map(|st| st == s.status).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// active stream count per container id, used by the engine selector
    /// (spec.md §4.5) without exposing the stream table itself.
    pub fn active_stream_counts(&self) -> HashMap<String, usize> {
        let guard = self.inner.read().unwrap();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for s in guard.streams.values().filter(|s| s.status == StreamStatus::Started) {
            *counts.entry(s.container_id.clone()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ace_types::{ContentId, StreamStatus};

    fn engine(id: &str) -> EngineRecord {
        EngineRecord::new(id, format!("acestream-{id}"), "127.0.0.1", 40000)
    }

    #[test]
    fn add_and_get_round_trips() {
        let store = StateStore::new();
        store.add_engine(engine("c1"));
        assert!(store.get_engine("c1").is_some());
        assert!(store.get_engine("missing").is_none());
    }

    #[test]
    fn remove_is_observed_immediately() {
        let store = StateStore::new();
        store.add_engine(engine("c1"));
        store.remove_engine("c1");
        assert!(store.get_engine("c1").is_none());
        assert!(store.list_engines().is_empty());
    }

    #[test]
    fn at_most_one_forwarded_per_vpn() {
        let store = StateStore::new();
        let vpn = VpnId::new("vpn1");
        store.add_engine(engine("c1"));
        store.add_engine(engine("c2"));
        store.set_engine_vpn("c1", Some(vpn.clone()));
        store.set_engine_vpn("c2", Some(vpn.clone()));
        store.set_forwarded("c1", &vpn);
        store.set_forwarded("c2", &vpn);
        let forwarded: Vec<_> = store.engines_for_vpn(&vpn).into_iter().filter(|e| e.forwarded).collect();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].container_id, "c2");
    }

    #[test]
    fn active_stream_counts_only_counts_started() {
        let store = StateStore::new();
        let content_a = ContentId::parse(&"a".repeat(40)).unwrap();
        let content_b = ContentId::parse(&"b".repeat(40)).unwrap();
        store.record_stream_start(StreamRecord {
            content_id: content_a.clone(),
            container_id: "c1".into(),
            playback_url: "http://x".into(),
            stat_url: None,
            command_url: None,
            playback_session_id: None,
            started_at: Utc::now(),
            status: StreamStatus::Started,
            bytes_sent: 0,
        });
        store.record_stream_start(StreamRecord {
            content_id: content_b.clone(),
            container_id: "c1".into(),
            playback_url: "http://y".into(),
            stat_url: None,
            command_url: None,
            playback_session_id: None,
            started_at: Utc::now(),
            status: StreamStatus::Started,
            bytes_sent: 0,
        });
        store.record_stream_stop(&content_b);
        let counts = store.active_stream_counts();
        assert_eq!(counts.get("c1"), Some(&1));
    }
}
