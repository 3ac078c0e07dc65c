use crate::breaker::CircuitBreaker;
use crate::controller::EngineController;
use crate::vpn_lookup::VpnLookup;
use ace_state::StateStore;
use ace_types::{EngineHealth, EngineRecord, VpnMode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct HealthManagerConfig {
    pub min_replicas: usize,
    pub health_check_interval: Duration,
    pub failure_threshold: u32,
    pub unhealthy_grace_period: Duration,
    pub replacement_cooldown: Duration,
}

struct ProbeState {
    consecutive_failures: u32,
    unhealthy_since: Option<Instant>,
}

impl Default for ProbeState {
    fn default() -> Self {
        Self { consecutive_failures: 0, unhealthy_since: None }
    }
}

/// Probes every engine on an interval and drives the make-before-break
/// replacement loop (spec.md §4.3). Owns no container lifecycle logic
/// itself — all provisioning/stopping goes through [`EngineController`]
/// so the two stay consistent about ports, labels and VPN placement.
pub struct HealthManager {
    controller: Arc<EngineController>,
    state: Arc<StateStore>,
    vpn: Arc<dyn VpnLookup>,
    breaker: Arc<CircuitBreaker>,
    config: HealthManagerConfig,
    probes: Mutex<HashMap<String, ProbeState>>,
    last_replacement: Mutex<Option<Instant>>,
}

impl HealthManager {
    pub fn new(
        controller: Arc<EngineController>,
        state: Arc<StateStore>,
        vpn: Arc<dyn VpnLookup>,
        breaker: Arc<CircuitBreaker>,
        config: HealthManagerConfig,
    ) -> Self {
        Self {
            controller,
            state,
            vpn,
            breaker,
            config,
            probes: Mutex::new(HashMap::new()),
            last_replacement: Mutex::new(None),
        }
    }

    /// Records the outcome of a single probe (caller performs the actual
    /// HTTP liveness check; this module only tracks the resulting health
    /// state transition). Returns the engine's classification after the
    /// update is applied.
    pub async fn record_probe_result(&self, container_id: &str, succeeded: bool) {
        let mut probes = self.probes.lock().await;
        let entry = probes.entry(container_id.to_owned()).or_default();

        if succeeded {
            entry.consecutive_failures = 0;
            entry.unhealthy_since = None;
            self.state.set_engine_health(container_id, EngineHealth::Healthy);
            return;
        }

        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.config.failure_threshold {
            if entry.unhealthy_since.is_none() {
                entry.unhealthy_since = Some(Instant::now());
            }
            self.state.set_engine_health(container_id, EngineHealth::Unhealthy);
        }
    }

    fn is_eligible_for_replacement(&self, probes: &HashMap<String, ProbeState>, container_id: &str) -> bool {
        probes
            .get(container_id)
            .and_then(|p| p.unhealthy_since)
            .map(|since| since.elapsed() >= self.config.unhealthy_grace_period)
            .unwrap_or(false)
    }

    /// One tick of the replacement loop. Deliberately never propagates
    /// provisioning errors out of the loop (spec.md §4.3 "Failure policy");
    /// callers running this on an interval should ignore the return value
    /// beyond logging.
    pub async fn tick(&self) {
        let engines = self.state.list_engines();
        let probes = self.probes.lock().await;

        let healthy: Vec<&EngineRecord> = engines.iter().filter(|e| e.health == EngineHealth::Healthy).collect();
        let eligible: Vec<&EngineRecord> = engines
            .iter()
            .filter(|e| e.health == EngineHealth::Unhealthy)
            .filter(|e| self.is_eligible_for_replacement(&probes, &e.container_id))
            .collect();
        drop(probes);

        if healthy.len() < self.config.min_replicas {
            self.top_up(self.config.min_replicas - healthy.len()).await;
            return;
        }

        if !eligible.is_empty() {
            self.replace_one(eligible[0]).await;
        }
    }

    async fn top_up(&self, deficit: usize) {
        let target_vpn = match self.vpn.mode() {
            VpnMode::Disabled => None,
            VpnMode::Single => self.vpn.configured_vpns().into_iter().next(),
            VpnMode::Redundant => {
                self.vpn.recovery_target().or_else(|| self.vpn.emergency_healthy_vpn()).or_else(|| {
                    self.vpn
                        .configured_vpns()
                        .into_iter()
                        .min_by_key(|v| self.state.engines_for_vpn(v).len())
                })
            }
        };

        if let Some(vpn) = &target_vpn {
            if self.vpn.in_stabilization_window(vpn) {
                info!(vpn = %vpn, "deferring top-up: vpn in recovery stabilization window");
                return;
            }
            if let Some(recovery) = self.vpn.recovery_target() {
                if &recovery != vpn {
                    info!(vpn = %vpn, recovery = %recovery, "deferring top-up: recovery in progress on another vpn");
                    return;
                }
            }
        }

        if !self.breaker.can_provision("general") {
            warn!("provisioning circuit breaker open, skipping top-up");
            return;
        }

        for _ in 0..deficit {
            match self.controller.provision_engine(target_vpn.clone()).await {
                Ok(record) => {
                    self.breaker.record_success("general");
                    info!(container_id = %record.container_id, "topped up fleet");
                }
                Err(e) => {
                    self.breaker.record_failure("general");
                    warn!(error = %e, "top-up provisioning failed");
                    break;
                }
            }
        }
    }

    async fn replace_one(&self, target: &EngineRecord) {
        {
            let mut last = self.last_replacement.lock().await;
            if let Some(t) = *last {
                if t.elapsed() < self.config.replacement_cooldown {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        if !self.breaker.can_provision("replacement") {
            warn!("replacement circuit breaker open, skipping replacement");
            return;
        }

        let replacement = match self.controller.provision_engine(target.vpn_id.clone()).await {
            Ok(record) => {
                self.breaker.record_success("replacement");
                record
            }
            Err(e) => {
                self.breaker.record_failure("replacement");
                warn!(error = %e, "replacement provisioning failed");
                return;
            }
        };

        tokio::time::sleep(Duration::from_secs(10)).await;

        if let Err(e) = self.controller.stop_engine(&target.container_id).await {
            warn!(container_id = %target.container_id, error = %e, "failed to stop replaced engine");
        }

        let mut probes = self.probes.lock().await;
        probes.remove(&target.container_id);
        drop(probes);

        info!(
            old = %target.container_id,
            new = %replacement.container_id,
            "replaced unhealthy engine"
        );
    }

    pub fn health_check_interval(&self) -> Duration {
        self.config.health_check_interval
    }
}
