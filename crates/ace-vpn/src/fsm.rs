use ace_types::VpnStatus;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Outcome of feeding one health observation into a [`VpnFsm`] (spec.md
/// §4.2 "Transitions and side effects"). The caller (the coordinator) acts
/// on the variant; the FSM itself only tracks state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// No change in reported health this tick.
    None,
    /// `* -> Healthy` for the first time this process has observed it.
    FirstHealthy,
    /// `Healthy -> Unhealthy`.
    BecameUnhealthy,
    /// `Unhealthy -> Healthy`.
    Recovered,
}

/// Outcome of feeding one forwarded-port observation into a [`VpnFsm`]
/// (spec.md §4.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortObservation {
    /// Too soon since the last check; the call was a no-op.
    Throttled,
    /// 401 from the sidecar, or no port reported.
    NotSupported,
    /// First port observed since the baseline was last reset.
    Baseline(u16),
    /// Same port as last observed.
    Unchanged(u16),
    /// A genuine change while healthy, outside recovery stabilization.
    Changed { old: u16, new: u16 },
}

/// Per-VPN state machine (spec.md §4.2 "Per-VPN FSM"). Holds only raw
/// timestamps and counters; every duration threshold is supplied by the
/// caller so one struct serves every VPN regardless of which knobs the
/// operator configured (mirrors `VpnContainerMonitor`'s field-per-concern
/// layout in `original_source/app/services/gluetun.py`, translated into
/// explicit transition return values instead of inline side effects).
#[derive(Debug, Clone)]
pub struct VpnFsm {
    status: VpnStatus,
    last_health: Option<bool>,
    first_healthy_time: Option<DateTime<Utc>>,
    consecutive_healthy: u32,
    unhealthy_since: Option<DateTime<Utc>>,
    force_restart_attempted: bool,
    last_restart_time: Option<DateTime<Utc>>,
    last_recovery_time: Option<DateTime<Utc>>,
    last_logged_status: Option<String>,

    last_stable_forwarded_port: Option<u16>,
    last_port_check_time: Option<DateTime<Utc>>,

    cached_port: Option<u16>,
    cached_port_at: Option<DateTime<Utc>>,

    last_double_check: Option<DateTime<Utc>>,
}

impl Default for VpnFsm {
    fn default() -> Self {
        Self {
            status: VpnStatus::Unknown,
            last_health: None,
            first_healthy_time: None,
            consecutive_healthy: 0,
            unhealthy_since: None,
            force_restart_attempted: false,
            last_restart_time: None,
            last_recovery_time: None,
            last_logged_status: None,
            last_stable_forwarded_port: None,
            last_port_check_time: None,
            cached_port: None,
            cached_port_at: None,
            last_double_check: None,
        }
    }
}

impl VpnFsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> VpnStatus {
        self.status
    }

    pub fn last_health(&self) -> Option<bool> {
        self.last_health
    }

    pub fn unhealthy_since(&self) -> Option<DateTime<Utc>> {
        self.unhealthy_since
    }

    pub fn last_restart_time(&self) -> Option<DateTime<Utc>> {
        self.last_restart_time
    }

    pub fn last_recovery_time(&self) -> Option<DateTime<Utc>> {
        self.last_recovery_time
    }

    /// Feed one health probe result. Updates internal bookkeeping and
    /// returns the transition the caller should act on.
    pub fn observe_health(&mut self, healthy: bool, now: DateTime<Utc>) -> HealthTransition {
        let previous = self.last_health;
        self.last_health = Some(healthy);

        if healthy {
            let first = self.first_healthy_time.is_none();
            if first {
                self.first_healthy_time = Some(now);
            }
            self.consecutive_healthy += 1;
            let was_unhealthy = self.unhealthy_since.is_some();
            self.unhealthy_since = None;
            self.force_restart_attempted = false;
            self.status = VpnStatus::Healthy;

            if first {
                HealthTransition::FirstHealthy
            } else if previous == Some(false) || was_unhealthy {
                self.last_recovery_time = Some(now);
                HealthTransition::Recovered
            } else {
                HealthTransition::None
            }
        } else {
            self.consecutive_healthy = 0;
            if self.unhealthy_since.is_none() {
                self.unhealthy_since = Some(now);
            }
            let became_unhealthy = previous == Some(true);
            self.status = VpnStatus::Unhealthy;
            if became_unhealthy {
                HealthTransition::BecameUnhealthy
            } else {
                HealthTransition::None
            }
        }
    }

    /// De-duplicates "container not running" log spam: returns `true` the
    /// first time a given status string is seen, `false` on repeats
    /// (spec.md §4.2 "log the degraded status at most once per distinct
    /// status value").
    pub fn should_log_status(&mut self, status: &str) -> bool {
        if self.last_logged_status.as_deref() == Some(status) {
            return false;
        }
        self.last_logged_status = Some(status.to_owned());
        true
    }

    pub fn clear_logged_status(&mut self) {
        self.last_logged_status = None;
    }

    /// Whether sustained unhealthy time warrants one forced container
    /// restart (spec.md §4.2 "Unhealthy for >= VPN_UNHEALTHY_RESTART_TIMEOUT").
    /// `force_restart_attempted` gates subsequent restarts until the next
    /// healthy observation, preventing a restart loop.
    pub fn should_force_restart(&self, now: DateTime<Utc>, restart_timeout: Duration) -> bool {
        if self.force_restart_attempted {
            return false;
        }
        match self.unhealthy_since {
            Some(since) => (now - since).to_std().unwrap_or(Duration::ZERO) >= restart_timeout,
            None => false,
        }
    }

    /// Throttles the engine-side double-check probe to at most once per
    /// `interval` per VPN, so a run of consecutive unhealthy ticks does not
    /// hammer every assigned engine's API on every poll. Returns `true` and
    /// records `now` as the time of the most recent check when the caller
    /// should actually perform the probe.
    pub fn should_double_check(&mut self, now: DateTime<Utc>, interval: Duration) -> bool {
        if let Some(last) = self.last_double_check {
            if (now - last).to_std().unwrap_or(Duration::ZERO) < interval {
                return false;
            }
        }
        self.last_double_check = Some(now);
        true
    }

    pub fn record_restart(&mut self, now: DateTime<Utc>) {
        self.force_restart_attempted = true;
        self.last_restart_time = Some(now);
        self.status = VpnStatus::Restarting;
    }

    /// Suppresses port-forward API calls for a short window right after a
    /// forced restart, since the sidecar process is still coming back up
    /// (SUPPLEMENTED BEHAVIOR #1, grounded on `_is_in_restart_grace_period`).
    pub fn in_restart_grace_period(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match self.last_restart_time {
            Some(t) => (now - t).to_std().unwrap_or(Duration::ZERO) < grace,
            None => false,
        }
    }

    /// The 120 s window after an unhealthy->healthy transition during
    /// which the Health Manager must defer provisioning decisions for this
    /// VPN (spec.md §4.2 "recovery stabilization window").
    pub fn in_recovery_stabilization(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_recovery_time {
            Some(t) => (now - t).to_std().unwrap_or(Duration::ZERO) < window,
            None => false,
        }
    }

    /// Gate for restarting engines on a *single*-VPN reconnect: requires
    /// both a startup grace period since first-ever-healthy and a run of
    /// consecutive healthy polls, so that the noisy first few seconds of a
    /// fresh boot are never mistaken for a reconnection (SUPPLEMENTED
    /// BEHAVIOR #2, grounded on `should_restart_engines_on_reconnection`).
    pub fn should_restart_engines_on_reconnect(
        &self,
        now: DateTime<Utc>,
        startup_grace: Duration,
        min_stable_checks: u32,
    ) -> bool {
        let Some(first) = self.first_healthy_time else {
            return false;
        };
        if (now - first).to_std().unwrap_or(Duration::ZERO) < startup_grace {
            return false;
        }
        self.consecutive_healthy >= min_stable_checks
    }

    /// Reads the cached forwarded port if the TTL has not lapsed (spec.md
    /// §3 "cached forwarded port + cache expiry"). This is the value
    /// `ace-engine` consults when deciding whether a new engine should
    /// bind the forwarded P2P port.
    pub fn cached_forwarded_port(&self, now: DateTime<Utc>, ttl: Duration) -> Option<u16> {
        let at = self.cached_port_at?;
        if (now - at).to_std().unwrap_or(Duration::ZERO) >= ttl {
            return None;
        }
        self.cached_port
    }

    /// Records a freshly fetched forwarded port (or its absence) in the
    /// consumption cache. Distinct from the change-detection baseline in
    /// [`Self::observe_port`]: this one is TTL-bounded and is what callers
    /// read for "what port should the next engine bind", mirroring the
    /// split between `_cached_port` and `_last_stable_forwarded_port` in
    /// `original_source/app/services/gluetun.py`.
    pub fn set_cached_forwarded_port(&mut self, port: Option<u16>, now: DateTime<Utc>) {
        self.cached_port = port;
        self.cached_port_at = Some(now);
    }

    /// Invalidates the consumption cache. Called on every health
    /// transition (spec.md §4.2 "invalidate cached forwarded port").
    pub fn invalidate_port_cache(&mut self) {
        self.cached_port = None;
        self.cached_port_at = None;
    }

    /// Resets the port-change baseline. Called on emergency-mode entry so
    /// a VPN's eventual recovery is never spuriously read as a "port
    /// change" against its pre-failure port (spec.md §4.2.2).
    pub fn reset_port_tracking(&mut self) {
        self.last_stable_forwarded_port = None;
        self.last_port_check_time = None;
    }

    /// Feed one forwarded-port observation. `healthy` gates the whole
    /// check per spec.md §4.2.1 ("only check when healthy"); recovery
    /// stabilization additionally suppresses change *detection* while
    /// still updating the baseline, so a future check starts from the
    /// post-recovery port rather than falsely diffing against the old one.
    #[allow(clippy::too_many_arguments)]
    pub fn observe_port(
        &mut self,
        port: Option<u16>,
        healthy: bool,
        now: DateTime<Utc>,
        check_interval: Duration,
        in_recovery_stabilization: bool,
    ) -> PortObservation {
        if !healthy {
            return PortObservation::NotSupported;
        }
        if let Some(last) = self.last_port_check_time {
            if (now - last).to_std().unwrap_or(Duration::ZERO) < check_interval {
                return PortObservation::Throttled;
            }
        }
        self.last_port_check_time = Some(now);

        let Some(port) = port else {
            return PortObservation::NotSupported;
        };

        let Some(baseline) = self.last_stable_forwarded_port else {
            self.last_stable_forwarded_port = Some(port);
            return PortObservation::Baseline(port);
        };

        if port == baseline {
            return PortObservation::Unchanged(port);
        }

        self.last_stable_forwarded_port = Some(port);
        if in_recovery_stabilization {
            return PortObservation::Baseline(port);
        }
        PortObservation::Changed { old: baseline, new: port }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn first_healthy_observation_is_first_healthy() {
        let mut fsm = VpnFsm::new();
        let now = Utc::now();
        assert_eq!(fsm.observe_health(true, now), HealthTransition::FirstHealthy);
    }

    #[test]
    fn unhealthy_then_healthy_is_recovered() {
        let mut fsm = VpnFsm::new();
        let t0 = Utc::now();
        fsm.observe_health(true, t0);
        fsm.observe_health(false, t0 + ChronoDuration::seconds(1));
        let t2 = t0 + ChronoDuration::seconds(2);
        assert_eq!(fsm.observe_health(true, t2), HealthTransition::Recovered);
        assert_eq!(fsm.last_recovery_time(), Some(t2));
    }

    #[test]
    fn healthy_then_unhealthy_is_became_unhealthy() {
        let mut fsm = VpnFsm::new();
        let t0 = Utc::now();
        fsm.observe_health(true, t0);
        assert_eq!(
            fsm.observe_health(false, t0 + ChronoDuration::seconds(1)),
            HealthTransition::BecameUnhealthy
        );
    }

    #[test]
    fn repeated_health_is_noop_transition() {
        let mut fsm = VpnFsm::new();
        let t0 = Utc::now();
        fsm.observe_health(true, t0);
        assert_eq!(fsm.observe_health(true, t0 + ChronoDuration::seconds(1)), HealthTransition::None);
    }

    #[test]
    fn status_log_dedup() {
        let mut fsm = VpnFsm::new();
        assert!(fsm.should_log_status("exited"));
        assert!(!fsm.should_log_status("exited"));
        assert!(fsm.should_log_status("paused"));
    }

    #[test]
    fn force_restart_gated_by_timeout_and_single_attempt() {
        let mut fsm = VpnFsm::new();
        let t0 = Utc::now();
        fsm.observe_health(false, t0);
        assert!(!fsm.should_force_restart(t0, Duration::from_secs(120)));
        let later = t0 + ChronoDuration::seconds(130);
        assert!(fsm.should_force_restart(later, Duration::from_secs(120)));
        fsm.record_restart(later);
        assert!(!fsm.should_force_restart(later + ChronoDuration::seconds(10), Duration::from_secs(120)));
    }

    #[test]
    fn restart_grace_period_suppresses_port_fetch_window() {
        let mut fsm = VpnFsm::new();
        let t0 = Utc::now();
        fsm.record_restart(t0);
        assert!(fsm.in_restart_grace_period(t0 + ChronoDuration::seconds(5), Duration::from_secs(15)));
        assert!(!fsm.in_restart_grace_period(t0 + ChronoDuration::seconds(20), Duration::from_secs(15)));
    }

    #[test]
    fn port_change_detected_outside_stabilization() {
        let mut fsm = VpnFsm::new();
        let t0 = Utc::now();
        assert_eq!(
            fsm.observe_port(Some(100), true, t0, Duration::from_secs(30), false),
            PortObservation::Baseline(100)
        );
        let t1 = t0 + ChronoDuration::seconds(31);
        assert_eq!(
            fsm.observe_port(Some(200), true, t1, Duration::from_secs(30), false),
            PortObservation::Changed { old: 100, new: 200 }
        );
    }

    #[test]
    fn port_change_suppressed_during_stabilization() {
        let mut fsm = VpnFsm::new();
        let t0 = Utc::now();
        fsm.observe_port(Some(100), true, t0, Duration::from_secs(30), false);
        let t1 = t0 + ChronoDuration::seconds(31);
        assert_eq!(
            fsm.observe_port(Some(200), true, t1, Duration::from_secs(30), true),
            PortObservation::Baseline(200)
        );
        let t2 = t1 + ChronoDuration::seconds(31);
        assert_eq!(
            fsm.observe_port(Some(200), true, t2, Duration::from_secs(30), false),
            PortObservation::Unchanged(200)
        );
    }

    #[test]
    fn port_check_is_throttled() {
        let mut fsm = VpnFsm::new();
        let t0 = Utc::now();
        fsm.observe_port(Some(100), true, t0, Duration::from_secs(30), false);
        assert_eq!(
            fsm.observe_port(Some(200), true, t0 + ChronoDuration::seconds(5), Duration::from_secs(30), false),
            PortObservation::Throttled
        );
    }

    #[test]
    fn double_check_is_throttled_per_vpn() {
        let mut fsm = VpnFsm::new();
        let t0 = Utc::now();
        assert!(fsm.should_double_check(t0, Duration::from_secs(30)));
        assert!(!fsm.should_double_check(t0 + ChronoDuration::seconds(10), Duration::from_secs(30)));
        assert!(fsm.should_double_check(t0 + ChronoDuration::seconds(31), Duration::from_secs(30)));
    }

    #[test]
    fn reconnect_gate_requires_grace_and_stability() {
        let mut fsm = VpnFsm::new();
        let t0 = Utc::now();
        fsm.observe_health(true, t0);
        assert!(!fsm.should_restart_engines_on_reconnect(t0, Duration::from_secs(60), 5));
        for i in 1..5 {
            fsm.observe_health(true, t0 + ChronoDuration::seconds(i));
        }
        let later = t0 + ChronoDuration::seconds(65);
        assert!(fsm.should_restart_engines_on_reconnect(later, Duration::from_secs(60), 5));
    }
}
