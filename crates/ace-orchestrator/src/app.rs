//! Composition root (spec.md Design Note 9): constructs exactly one
//! instance of every component and wires them together with explicit
//! `Arc` references. No component reaches for a global; everything it
//! needs is a constructor argument.

use crate::config::OrchestratorConfig;
use crate::events::BroadcastEventSink;
use crate::health_probe::{run_replacement_loop, HealthProbe};
use ace_docker::{BollardRuntime, ContainerRuntime};
use ace_engine::{CircuitBreaker, EngineController, EngineControllerConfig, HealthManager, HealthManagerConfig, VpnLookup};
use ace_ports::PortAllocator;
use ace_proxy::ProxySessionManager;
use ace_state::StateStore;
use ace_types::{EventSink, VpnId};
use ace_vpn::{VpnCoordinator, VpnCoordinatorConfig, VpnFleet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Everything an HTTP handler or background task needs, cloned cheaply
/// (every field is an `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<EngineController>,
    pub state: Arc<StateStore>,
    pub vpn: Arc<VpnFleet>,
    pub proxy: Arc<ProxySessionManager>,
    pub events: Arc<BroadcastEventSink>,
    pub proxy_config: Arc<ace_proxy::ProxyConfig>,
}

/// Background tasks that must be asked to stop before the process exits.
pub struct Background {
    cancel_tx: watch::Sender<bool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Background {
    /// Signals every task to stop and waits for them to actually finish
    /// their current tick (spec.md §5 "every long-running task observes
    /// the shutdown signal within one poll interval and exits").
    pub async fn shutdown(self) {
        let _ = self.cancel_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Builds every component and spawns the long-running background tasks
/// (VPN poll loop, health probe loop, health replacement loop, proxy
/// ghost sweep). Returns the shared [`AppState`] for the HTTP layer plus
/// the [`Background`] handle used to cancel everything on shutdown.
pub async fn build(config: &OrchestratorConfig) -> anyhow::Result<(AppState, Background)> {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(BollardRuntime::connect_with_local_defaults()?);
    let ports = Arc::new(PortAllocator::new(config.ports.clone().into_allocator_config()));
    let state = Arc::new(StateStore::new());
    let events = Arc::new(BroadcastEventSink::new(1024));

    let vpn_tuples: Vec<(VpnId, String, u16)> = config.vpn.sidecars.iter().map(|s| (s.id.clone(), s.container_name.clone(), s.api_port)).collect();
    let fleet = Arc::new(VpnFleet::new(config.vpn.mode, vpn_tuples, config.vpn.recovery_stabilization_window, config.vpn.port_cache_ttl));
    let vpn_lookup: Arc<dyn VpnLookup> = fleet.clone();

    let controller = Arc::new(EngineController::new(
        runtime.clone(),
        ports.clone(),
        state.clone(),
        vpn_lookup.clone(),
        EngineControllerConfig {
            target_image: config.fleet.target_image.clone(),
            ops_label: config.fleet.ops_label.clone(),
            startup_timeout: config.fleet.startup_timeout,
            stop_timeout_secs: config.fleet.stop_timeout_secs,
            map_https: config.fleet.map_https,
            variant: config.fleet.variant,
            max_replicas: config.fleet.max_replicas,
        },
    ));

    // See DESIGN.md: one breaker instance shared by the "general" and
    // "replacement" provisioning contexts, using the general threshold
    // pair; the replacement-specific env vars are validated but not
    // wired to a second instance.
    let breaker = Arc::new(CircuitBreaker::new(config.breaker.failure_threshold, config.breaker.recovery_timeout));

    let health_manager = Arc::new(HealthManager::new(
        controller.clone(),
        state.clone(),
        vpn_lookup.clone(),
        breaker.clone(),
        HealthManagerConfig {
            min_replicas: config.fleet.min_replicas,
            health_check_interval: config.health.check_interval,
            failure_threshold: config.health.failure_threshold,
            unhealthy_grace_period: config.health.unhealthy_grace_period,
            replacement_cooldown: config.health.replacement_cooldown,
        },
    ));

    let coordinator = Arc::new(VpnCoordinator::new(
        fleet.clone(),
        runtime.clone(),
        state.clone(),
        controller.clone(),
        events.clone() as Arc<dyn EventSink>,
        VpnCoordinatorConfig {
            health_check_interval: config.vpn.health_check_interval,
            unhealthy_restart_timeout: config.vpn.unhealthy_restart_timeout,
            restart_grace_period: config.vpn.restart_grace_period,
            port_check_interval: config.vpn.port_check_interval,
            startup_grace_period: config.vpn.startup_grace_period,
            min_stable_checks: config.vpn.min_stable_checks,
            restart_engines_on_reconnect: config.vpn.restart_engines_on_reconnect,
            min_replicas: config.fleet.min_replicas,
            double_check_interval: config.vpn.double_check_interval,
            recovery_port_wait_timeout: config.vpn.recovery_port_wait_timeout,
            recovery_port_poll_interval: config.vpn.recovery_port_poll_interval,
            stop_timeout_secs: config.fleet.stop_timeout_secs,
        },
    ));

    let proxy_config = Arc::new(config.proxy.clone());
    let proxy = Arc::new(ProxySessionManager::new(controller.clone(), fleet.clone(), state.clone(), events.clone() as Arc<dyn EventSink>, config.proxy.clone()));
    let ghost_sweep_interval = proxy_config.client_heartbeat_interval;

    info!("reconciling state store with observed container runtime");
    controller.reindex().await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut handles = Vec::new();

    {
        let coordinator = coordinator.clone();
        let cancel_rx = cancel_rx.clone();
        handles.push(tokio::spawn(async move { coordinator.run(cancel_rx).await }));
    }
    {
        let health_manager = health_manager.clone();
        let cancel_rx = cancel_rx.clone();
        handles.push(tokio::spawn(run_replacement_loop(health_manager, cancel_rx)));
    }
    {
        let probe = HealthProbe::new(health_manager.clone(), state.clone(), config.health.check_interval);
        let interval = config.health.check_interval;
        let cancel_rx = cancel_rx.clone();
        handles.push(tokio::spawn(async move { probe.run(interval, cancel_rx).await }));
    }
    {
        let proxy = proxy.clone();
        let mut cancel_rx = cancel_rx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                proxy.sweep_ghosts().await;
                tokio::select! {
                    _ = tokio::time::sleep(ghost_sweep_interval) => {}
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        }));
    }

    let app_state = AppState { controller, state, vpn: fleet, proxy, events, proxy_config };

    Ok((app_state, Background { cancel_tx, handles }))
}
