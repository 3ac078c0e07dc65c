use crate::fleet::VpnFleet;
use crate::fsm::{HealthTransition, PortObservation};
use ace_docker::{ContainerHealth, ContainerRuntime, ContainerStatus};
use ace_engine::EngineController;
use ace_state::StateStore;
use ace_types::{EventSink, OrchestratorEvent, VpnId, VpnMode};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct VpnCoordinatorConfig {
    pub health_check_interval: Duration,
    pub unhealthy_restart_timeout: Duration,
    pub restart_grace_period: Duration,
    pub port_check_interval: Duration,
    pub startup_grace_period: Duration,
    pub min_stable_checks: u32,
    pub restart_engines_on_reconnect: bool,
    pub min_replicas: usize,
    pub double_check_interval: Duration,
    pub recovery_port_wait_timeout: Duration,
    pub recovery_port_poll_interval: Duration,
    pub stop_timeout_secs: i64,
}

#[derive(Debug, Deserialize)]
struct ConnectionStatusResponse {
    result: ConnectionStatusResult,
}

#[derive(Debug, Deserialize)]
struct ConnectionStatusResult {
    connected: bool,
}

/// Drives the per-tick VPN health and port-forward poll loop: feeds raw
/// observations into each VPN's [`crate::fsm::VpnFsm`], then acts on the
/// transitions it reports (emergency mode, restarts, re-provisioning).
/// Mirrors `GluetunMonitor`'s `_monitor_gluetun` loop in shape, but every
/// decision here is driven by an explicit return value from the FSM rather
/// than scattered inline state mutation.
pub struct VpnCoordinator {
    fleet: Arc<VpnFleet>,
    runtime: Arc<dyn ContainerRuntime>,
    state: Arc<StateStore>,
    controller: Arc<EngineController>,
    events: Arc<dyn EventSink>,
    probe_http: reqwest::Client,
    config: VpnCoordinatorConfig,
}

impl VpnCoordinator {
    pub fn new(
        fleet: Arc<VpnFleet>,
        runtime: Arc<dyn ContainerRuntime>,
        state: Arc<StateStore>,
        controller: Arc<EngineController>,
        events: Arc<dyn EventSink>,
        config: VpnCoordinatorConfig,
    ) -> Self {
        Self {
            fleet,
            runtime,
            state,
            controller,
            events,
            probe_http: reqwest::Client::builder().timeout(Duration::from_secs(5)).build().unwrap_or_default(),
            config,
        }
    }

    /// One pass over every configured VPN. Never propagates errors: a
    /// single sidecar being briefly unreachable should not stall the other
    /// VPN's monitoring or the engine fleet's own health loop.
    pub async fn tick(&self) {
        for vpn in self.fleet.configured_vpns() {
            self.tick_one(&vpn).await;
        }
    }

    async fn tick_one(&self, vpn: &VpnId) {
        let Some(container_name) = self.fleet.container_name(vpn) else { return };
        let now = Utc::now();

        let status = match self.runtime.status(&container_name).await {
            Ok(s) => s,
            Err(e) => {
                warn!(vpn = %vpn, error = %e, "vpn status probe failed");
                return;
            }
        };

        if status != ContainerStatus::Running {
            let logged = self.fleet.with_fsm(vpn, |fsm| fsm.should_log_status(&status.to_string())).unwrap_or(false);
            if logged {
                warn!(vpn = %vpn, status = %status, "vpn container not running");
            }
            self.observe(vpn, false, now).await;
            return;
        }
        self.fleet.with_fsm(vpn, |fsm| fsm.clear_logged_status());

        let health = self.runtime.health_status(&container_name).await.unwrap_or(ContainerHealth::None);
        let mut healthy = health != ContainerHealth::Unhealthy;

        if !healthy {
            let was_healthy = self.fleet.is_healthy(vpn);
            let should_probe = self.fleet.with_fsm(vpn, |fsm| fsm.should_double_check(now, self.config.double_check_interval)).unwrap_or(false);
            if was_healthy && should_probe && self.confirm_truly_unhealthy(vpn).await {
                info!(vpn = %vpn, "double-check found engine connectivity, treating vpn as healthy");
                healthy = true;
            }
        }

        self.observe(vpn, healthy, now).await;

        if healthy {
            self.watch_port(vpn, now).await;
        }
    }

    async fn observe(&self, vpn: &VpnId, healthy: bool, now: chrono::DateTime<Utc>) {
        let transition = self.fleet.with_fsm(vpn, |fsm| fsm.observe_health(healthy, now)).unwrap_or(HealthTransition::None);

        match transition {
            HealthTransition::FirstHealthy => {
                info!(vpn = %vpn, "vpn first observed healthy");
                self.events.publish(OrchestratorEvent::VpnConnected { vpn_id: vpn.clone() });
            }
            HealthTransition::BecameUnhealthy => {
                warn!(vpn = %vpn, "vpn became unhealthy");
                self.fleet.with_fsm(vpn, |fsm| fsm.invalidate_port_cache());
                self.events.publish(OrchestratorEvent::VpnDisconnected { vpn_id: vpn.clone() });
                self.handle_vpn_failure(vpn, now).await;
            }
            HealthTransition::Recovered => {
                info!(vpn = %vpn, "vpn recovered");
                self.fleet.with_fsm(vpn, |fsm| fsm.invalidate_port_cache());
                self.handle_vpn_recovery(vpn, now).await;
            }
            HealthTransition::None => {}
        }

        if !healthy {
            let should_restart = self.fleet.with_fsm(vpn, |fsm| fsm.should_force_restart(now, self.config.unhealthy_restart_timeout)).unwrap_or(false);
            if should_restart {
                self.force_restart(vpn, now).await;
            }
        }
    }

    async fn handle_vpn_failure(&self, vpn: &VpnId, now: chrono::DateTime<Utc>) {
        if self.fleet.mode() != VpnMode::Redundant {
            return;
        }
        let Some(other) = self.fleet.other_vpn(vpn) else { return };
        if !self.fleet.is_healthy(&other) {
            return;
        }
        if !self.fleet.enter_emergency(vpn.clone(), other.clone(), now) {
            return;
        }
        warn!(failed = %vpn, healthy = %other, "entering emergency mode");
        self.fleet.with_fsm(vpn, |fsm| fsm.reset_port_tracking());
        self.events.publish(OrchestratorEvent::VpnEmergencyEntered { failed_vpn: vpn.clone(), healthy_vpn: other });

        for engine in self.state.engines_for_vpn(vpn) {
            if let Err(e) = self.controller.stop_engine(&engine.container_id).await {
                warn!(container_id = %engine.container_id, error = %e, "failed to stop engine on failed vpn");
            }
        }
    }

    async fn handle_vpn_recovery(&self, vpn: &VpnId, now: chrono::DateTime<Utc>) {
        if self.fleet.mode() == VpnMode::Redundant && self.fleet.exit_emergency_if_recovered(vpn) {
            info!(vpn = %vpn, "exiting emergency mode, beginning post-recovery provisioning");
            self.events.publish(OrchestratorEvent::VpnEmergencyExited { recovered_vpn: vpn.clone() });
            self.post_recovery_provision(vpn).await;
            return;
        }

        if self.config.restart_engines_on_reconnect {
            let should_restart = self
                .fleet
                .with_fsm(vpn, |fsm| fsm.should_restart_engines_on_reconnect(now, self.config.startup_grace_period, self.config.min_stable_checks))
                .unwrap_or(false);
            if should_restart {
                self.restart_engines_for_vpn(vpn).await;
            }
        }
    }

    async fn force_restart(&self, vpn: &VpnId, now: chrono::DateTime<Utc>) {
        let Some(container_name) = self.fleet.container_name(vpn) else { return };
        warn!(vpn = %vpn, "forcing vpn container restart after sustained unhealthy period");
        if let Err(e) = self.runtime.stop(&container_name, self.config.stop_timeout_secs).await {
            warn!(vpn = %vpn, error = %e, "vpn restart: stop failed");
        }
        if let Err(e) = self.runtime.start(&container_name).await {
            warn!(vpn = %vpn, error = %e, "vpn restart: start failed");
        }
        self.fleet.with_fsm(vpn, |fsm| fsm.record_restart(now));
    }

    /// Samples engines assigned to `vpn` for internet connectivity through
    /// the engine's own API, used to override a possibly-transient
    /// "unhealthy" runtime reading before acting on it.
    async fn confirm_truly_unhealthy(&self, vpn: &VpnId) -> bool {
        let engines = self.state.engines_for_vpn(vpn);
        for engine in engines.iter().take(3) {
            let url = format!("http://{}:{}/server/api?api_version=3&method=get_network_connection_status", engine.host, engine.http_port);
            let Ok(resp) = self.probe_http.get(&url).send().await else { continue };
            let Ok(body) = resp.json::<ConnectionStatusResponse>().await else { continue };
            if body.result.connected {
                return true;
            }
        }
        false
    }

    async fn watch_port(&self, vpn: &VpnId, now: chrono::DateTime<Utc>) {
        let in_grace = self.fleet.with_fsm(vpn, |fsm| fsm.in_restart_grace_period(now, self.config.restart_grace_period)).unwrap_or(false);
        if in_grace {
            return;
        }
        let Some(client) = self.fleet.client(vpn) else { return };
        let outcome = client.get_forwarded_port().await;
        let port = match outcome {
            crate::client::PortForwardOutcome::Port(p) => Some(p),
            crate::client::PortForwardOutcome::NotSupported => None,
            crate::client::PortForwardOutcome::Error(e) => {
                warn!(vpn = %vpn, error = %e, "port-forward probe failed");
                return;
            }
        };

        let in_stabilization = self.fleet.in_recovery_stabilization_window(vpn);
        let observation = self
            .fleet
            .with_fsm(vpn, |fsm| fsm.observe_port(port, true, now, self.config.port_check_interval, in_stabilization))
            .unwrap_or(PortObservation::Throttled);

        match observation {
            PortObservation::Throttled => {}
            PortObservation::NotSupported => {
                self.fleet.with_fsm(vpn, |fsm| fsm.set_cached_forwarded_port(None, now));
            }
            PortObservation::Baseline(p) | PortObservation::Unchanged(p) => {
                self.fleet.with_fsm(vpn, |fsm| fsm.set_cached_forwarded_port(Some(p), now));
            }
            PortObservation::Changed { old, new } => {
                self.fleet.with_fsm(vpn, |fsm| fsm.set_cached_forwarded_port(Some(new), now));
                self.handle_port_change(vpn, old, new).await;
            }
        }
    }

    /// A forwarded port changing while the VPN is otherwise healthy means
    /// the tunnel re-established under a new port: the engine holding the
    /// old port is no longer reachable on it and must be replaced.
    async fn handle_port_change(&self, vpn: &VpnId, old: u16, new: u16) {
        info!(vpn = %vpn, old, new, "forwarded port changed, replacing forwarded engine");
        if let Some(engine) = self.state.forwarded_engine(vpn) {
            if let Err(e) = self.controller.stop_engine(&engine.container_id).await {
                warn!(container_id = %engine.container_id, error = %e, "failed to stop engine after port change");
            }
        }
        if let Err(e) = self.controller.provision_engine(Some(vpn.clone())).await {
            warn!(vpn = %vpn, error = %e, "failed to reprovision engine after port change");
        }
    }

    /// After emergency mode exits, waits briefly for the recovered VPN's
    /// forwarded port to settle, then tops the fleet back up to
    /// MIN_REPLICAS with engines pinned to the recovered VPN.
    async fn post_recovery_provision(&self, vpn: &VpnId) {
        let vpn = vpn.clone();
        self.fleet.set_recovery_target(Some(vpn.clone()));

        let deadline = tokio::time::Instant::now() + self.config.recovery_port_wait_timeout;
        loop {
            if self.fleet.forwarded_port(&vpn).is_some() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.config.recovery_port_poll_interval).await;
        }

        let current = self.state.engines_for_vpn(&vpn).len();
        let deficit = self.config.min_replicas.saturating_sub(current);
        for _ in 0..deficit {
            match self.controller.provision_engine(Some(vpn.clone())).await {
                Ok(record) => info!(container_id = %record.container_id, vpn = %vpn, "restored post-recovery capacity"),
                Err(e) => {
                    warn!(vpn = %vpn, error = %e, "post-recovery provisioning failed");
                    break;
                }
            }
        }
        self.fleet.set_recovery_target(None);
    }

    /// Single-VPN rolling restart on reconnect: replace every engine on
    /// this VPN one at a time, make-before-break, so a fresh tunnel is
    /// always used by new engines without a window of zero capacity.
    async fn restart_engines_for_vpn(&self, vpn: &VpnId) {
        info!(vpn = %vpn, "restarting engines after vpn reconnect");
        for engine in self.state.engines_for_vpn(vpn) {
            match self.controller.provision_engine(Some(vpn.clone())).await {
                Ok(_) => {
                    if let Err(e) = self.controller.stop_engine(&engine.container_id).await {
                        warn!(container_id = %engine.container_id, error = %e, "failed to stop old engine during reconnect restart");
                    }
                }
                Err(e) => {
                    warn!(vpn = %vpn, error = %e, "failed to provision replacement during reconnect restart");
                    break;
                }
            }
        }
    }

    /// Runs the poll loop until `cancel` reports a cancellation value of
    /// `true`, checked between ticks so an in-flight tick always finishes.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        loop {
            self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(self.config.health_check_interval) => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
