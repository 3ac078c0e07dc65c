use crate::client::GluetunClient;
use crate::fsm::VpnFsm;
use ace_engine::VpnLookup;
use ace_types::{VpnId, VpnMode};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// One configured VPN sidecar: its FSM plus the fixed facts about it that
/// never change after startup (spec.md §3 "VPN (monitor entry)").
struct VpnEntry {
    container_name: String,
    client: GluetunClient,
    fsm: VpnFsm,
}

/// `(failed_vpn_id, healthy_vpn_id, entered_at)` (spec.md §4.2.2).
#[derive(Debug, Clone)]
pub struct EmergencyRecord {
    pub failed_vpn: VpnId,
    pub healthy_vpn: VpnId,
    pub entered_at: DateTime<Utc>,
}

struct Inner {
    mode: VpnMode,
    vpns: HashMap<VpnId, VpnEntry>,
    /// Configuration order (`vpn1` before `vpn2`), kept alongside the
    /// lookup map since `HashMap` iteration order is not insertion order
    /// and spec.md §4.1 step 4 requires ties to resolve to "VPN 1".
    order: Vec<VpnId>,
    emergency: Option<EmergencyRecord>,
    recovery_target: Option<VpnId>,
}

/// The VPN Fleet aggregate (spec.md §3 "VPN Fleet"). Exclusively owns every
/// [`VpnFsm`] and the fleet-wide emergency-mode / recovery-target state,
/// behind one `RwLock`, mirroring [`ace_state::StateStore`]'s single-lock
/// ownership model for the engine side.
pub struct VpnFleet {
    inner: RwLock<Inner>,
    recovery_stabilization_window: Duration,
    port_cache_ttl: Duration,
}

impl VpnFleet {
    pub fn new(
        mode: VpnMode,
        vpns: Vec<(VpnId, String, u16)>,
        recovery_stabilization_window: Duration,
        port_cache_ttl: Duration,
    ) -> Self {
        let mut map = HashMap::new();
        let mut order = Vec::new();
        for (id, container_name, api_port) in vpns {
            order.push(id.clone());
            map.insert(
                id,
                VpnEntry {
                    client: GluetunClient::new(&container_name, api_port),
                    container_name,
                    fsm: VpnFsm::new(),
                },
            );
        }
        Self {
            inner: RwLock::new(Inner {
                mode,
                vpns: map,
                order,
                emergency: None,
                recovery_target: None,
            }),
            recovery_stabilization_window,
            port_cache_ttl,
        }
    }

    pub fn mode(&self) -> VpnMode {
        self.inner.read().unwrap().mode
    }

    pub fn configured_vpns(&self) -> Vec<VpnId> {
        self.inner.read().unwrap().order.clone()
    }

    pub fn client(&self, vpn: &VpnId) -> Option<GluetunClient> {
        self.inner.read().unwrap().vpns.get(vpn).map(|e| e.client.clone())
    }

    pub fn container_name(&self, vpn: &VpnId) -> Option<String> {
        self.inner.read().unwrap().vpns.get(vpn).map(|e| e.container_name.clone())
    }

    pub fn is_healthy(&self, vpn: &VpnId) -> bool {
        self.inner.read().unwrap().vpns.get(vpn).map(|e| e.fsm.last_health() == Some(true)).unwrap_or(false)
    }

    /// Applies `f` to the named VPN's FSM under the write lock, returning
    /// whatever `f` returns. The one mutation seam every coordinator
    /// operation goes through.
    pub fn with_fsm<T>(&self, vpn: &VpnId, f: impl FnOnce(&mut VpnFsm) -> T) -> Option<T> {
        let mut guard = self.inner.write().unwrap();
        guard.vpns.get_mut(vpn).map(|e| f(&mut e.fsm))
    }

    pub fn in_stabilization_window(&self, vpn: &VpnId, now: DateTime<Utc>, window: Duration) -> bool {
        self.inner
            .read()
            .unwrap()
            .vpns
            .get(vpn)
            .map(|e| e.fsm.in_recovery_stabilization(now, window))
            .unwrap_or(false)
    }

    /// Same check using the fleet's own configured stabilization window,
    /// for callers outside the `VpnLookup` seam (the coordinator's
    /// port-forward watcher) that do not want to thread the duration
    /// through themselves.
    pub fn in_recovery_stabilization_window(&self, vpn: &VpnId) -> bool {
        self.in_stabilization_window(vpn, Utc::now(), self.recovery_stabilization_window)
    }

    pub fn other_vpn(&self, vpn: &VpnId) -> Option<VpnId> {
        self.inner.read().unwrap().order.iter().find(|id| *id != vpn).cloned()
    }

    /// Enters emergency mode iff not already in it. Returns `true` if this
    /// call was the one that entered it (spec.md §4.2.2 "Entry rule").
    pub fn enter_emergency(&self, failed_vpn: VpnId, healthy_vpn: VpnId, now: DateTime<Utc>) -> bool {
        let mut guard = self.inner.write().unwrap();
        if guard.emergency.is_some() {
            return false;
        }
        guard.emergency = Some(EmergencyRecord { failed_vpn, healthy_vpn, entered_at: now });
        true
    }

    /// Exits emergency mode iff `recovered_vpn` is the VPN that failed.
    /// Sets `recovery_target` to it on exit (spec.md §4.2.2 "Exit rule").
    /// Returns `true` if this call exited emergency mode.
    pub fn exit_emergency_if_recovered(&self, recovered_vpn: &VpnId) -> bool {
        let mut guard = self.inner.write().unwrap();
        let should_exit = guard.emergency.as_ref().map(|e| &e.failed_vpn == recovered_vpn).unwrap_or(false);
        if should_exit {
            guard.emergency = None;
            guard.recovery_target = Some(recovered_vpn.clone());
        }
        should_exit
    }

    pub fn emergency_record(&self) -> Option<EmergencyRecord> {
        self.inner.read().unwrap().emergency.clone()
    }

    pub fn is_emergency(&self) -> bool {
        self.inner.read().unwrap().emergency.is_some()
    }

    pub fn set_recovery_target(&self, vpn: Option<VpnId>) {
        self.inner.write().unwrap().recovery_target = vpn;
    }

    /// Best-effort public IP lookup for a configured VPN, informational
    /// only (spec.md SUPPLEMENTED BEHAVIOR #7). `None` if the VPN id is
    /// unknown or the sidecar's `/v1/publicip/ip` call fails.
    pub async fn public_ip(&self, vpn: &VpnId) -> Option<crate::client::PublicIpInfo> {
        let client = self.client(vpn)?;
        client.get_public_ip().await
    }
}

impl VpnLookup for VpnFleet {
    fn mode(&self) -> VpnMode {
        VpnFleet::mode(self)
    }

    fn configured_vpns(&self) -> Vec<VpnId> {
        VpnFleet::configured_vpns(self)
    }

    fn is_healthy(&self, vpn: &VpnId) -> bool {
        VpnFleet::is_healthy(self, vpn)
    }

    fn forwarded_port(&self, vpn: &VpnId) -> Option<u16> {
        let guard = self.inner.read().unwrap();
        guard.vpns.get(vpn).and_then(|e| e.fsm.cached_forwarded_port(Utc::now(), self.port_cache_ttl))
    }

    fn container_name(&self, vpn: &VpnId) -> String {
        VpnFleet::container_name(self, vpn).unwrap_or_else(|| vpn.to_string())
    }

    fn in_stabilization_window(&self, vpn: &VpnId) -> bool {
        VpnFleet::in_stabilization_window(self, vpn, Utc::now(), self.recovery_stabilization_window)
    }

    fn emergency_healthy_vpn(&self) -> Option<VpnId> {
        self.inner.read().unwrap().emergency.as_ref().map(|e| e.healthy_vpn.clone())
    }

    fn recovery_target(&self) -> Option<VpnId> {
        self.inner.read().unwrap().recovery_target.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> VpnFleet {
        VpnFleet::new(
            VpnMode::Redundant,
            vec![
                (VpnId::new("vpn1"), "gluetun1".to_owned(), 8000),
                (VpnId::new("vpn2"), "gluetun2".to_owned(), 8000),
            ],
            Duration::from_secs(120),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn emergency_entry_is_exclusive() {
        let fleet = fleet();
        let now = Utc::now();
        assert!(fleet.enter_emergency(VpnId::new("vpn1"), VpnId::new("vpn2"), now));
        assert!(!fleet.enter_emergency(VpnId::new("vpn2"), VpnId::new("vpn1"), now));
        assert_eq!(fleet.emergency_record().unwrap().failed_vpn, VpnId::new("vpn1"));
    }

    #[test]
    fn exit_only_for_the_failed_vpn() {
        let fleet = fleet();
        let now = Utc::now();
        fleet.enter_emergency(VpnId::new("vpn1"), VpnId::new("vpn2"), now);
        assert!(!fleet.exit_emergency_if_recovered(&VpnId::new("vpn2")));
        assert!(fleet.exit_emergency_if_recovered(&VpnId::new("vpn1")));
        assert!(!fleet.is_emergency());
        assert_eq!(fleet.recovery_target(), Some(VpnId::new("vpn1")));
    }

    #[test]
    fn other_vpn_returns_the_peer() {
        let fleet = fleet();
        assert_eq!(fleet.other_vpn(&VpnId::new("vpn1")), Some(VpnId::new("vpn2")));
    }
}
